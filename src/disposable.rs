//! Registre des domaines jetables, chargé par l'appelant puis figé.

use std::collections::HashSet;
use std::io::BufRead;

use tracing::debug;

/// Ensemble immuable de domaines ; appartenance exacte, sans réseau.
#[derive(Debug, Clone, Default)]
pub struct DisposableRegistry {
    domains: HashSet<String>,
}

impl DisposableRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .filter_map(|domain| canonical(domain.as_ref()))
            .collect();
        Self { domains }
    }

    /// Un domaine par ligne ; lignes vides et commentaires `#` ignorés.
    pub fn from_reader<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut domains = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            let entry = line.split('#').next().unwrap_or("");
            if let Some(domain) = canonical(entry) {
                domains.insert(domain);
            }
        }
        debug!(domains = domains.len(), "disposable registry loaded");
        Ok(Self { domains })
    }

    pub fn contains(&self, domain: &str) -> bool {
        canonical(domain).is_some_and(|domain| self.domains.contains(&domain))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

fn canonical(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    let ascii = idna::domain_to_ascii(trimmed).unwrap_or_else(|_| trimmed.to_ascii_lowercase());
    Some(ascii)
}
