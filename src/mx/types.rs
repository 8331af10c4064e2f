use std::time::Duration;

use chrono::{DateTime, Utc};

/// Un échangeur de courrier et sa préférence (plus petite = essayée d'abord).
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MxHost {
    pub preference: u16,
    pub exchange: String,
}

impl MxHost {
    pub fn new(preference: u16, exchange: impl Into<String>) -> Self {
        Self {
            preference,
            exchange: exchange.into(),
        }
    }
}

/// Résultat de résolution mis en cache pour un domaine.
///
/// `hosts` est trié par préférence croissante ; une liste vide signifie que le
/// domaine n'a ni MX ni enregistrement d'adresse (entrée négative, gardée
/// jusqu'à expiration comme les positives).
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub domain: String,
    pub hosts: Vec<MxHost>,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl MxRecord {
    pub fn new(domain: impl Into<String>, hosts: Vec<MxHost>, ttl: Duration) -> Self {
        Self {
            domain: domain.into(),
            hosts,
            fetched_at: Utc::now(),
            ttl,
        }
    }

    pub fn has_mx(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.fetched_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
