use std::sync::Arc;
use std::time::Duration;

use moka::Expiry;
use moka::future::Cache;
use tracing::{debug, warn};

use super::resolver::{LookupMx, resolve_with};
use super::{MxRecord, ResolutionError};
use crate::config::DnsOptions;

struct RecordTtl;

impl Expiry<String, MxRecord> for RecordTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MxRecord,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cache MX partagé entre toutes les tâches.
///
/// Une seule résolution est en vol par domaine : les appels concurrents pour
/// le même domaine attendent le résultat de la première. Les domaines
/// inexistants sont mémorisés comme les autres ; les échecs transitoires
/// (timeout après nouvelles tentatives, erreur du serveur DNS) ne le sont pas.
pub struct MxCache {
    resolver: Arc<dyn LookupMx>,
    entries: Cache<String, MxRecord>,
    ttl: Duration,
    dns: DnsOptions,
    max_hosts: usize,
}

impl MxCache {
    pub fn new(
        resolver: Arc<dyn LookupMx>,
        ttl: Duration,
        max_entries: u64,
        dns: DnsOptions,
        max_hosts: usize,
    ) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(RecordTtl)
            .build();
        Self {
            resolver,
            entries,
            ttl,
            dns,
            max_hosts,
        }
    }

    /// Renvoie l'enregistrement (éventuellement négatif) de `domain`.
    pub async fn resolve(&self, domain: &str) -> Result<MxRecord, ResolutionError> {
        self.entries
            .try_get_with(domain.to_string(), self.fetch(domain))
            .await
            .map_err(|err| (*err).clone())
    }

    /// Consultation sans requête réseau.
    pub async fn cached(&self, domain: &str) -> Option<MxRecord> {
        self.entries.get(domain).await
    }

    async fn fetch(&self, domain: &str) -> Result<MxRecord, ResolutionError> {
        let mut attempt = 0;
        loop {
            let lookup = tokio::time::timeout(
                self.dns.timeout,
                resolve_with(self.resolver.as_ref(), domain, self.max_hosts),
            )
            .await
            .unwrap_or(Err(ResolutionError::DnsTimeout));

            match lookup {
                Ok(answer) => {
                    // le TTL DNS borne la durée configurée
                    let ttl = answer.ttl.map_or(self.ttl, |ttl| ttl.min(self.ttl));
                    debug!(domain, hosts = answer.hosts.len(), ?ttl, "MX resolved");
                    return Ok(MxRecord::new(domain, answer.hosts, ttl));
                }
                Err(ResolutionError::DomainNotFound) => {
                    debug!(domain, "no mail exchanger");
                    return Ok(MxRecord::new(domain, Vec::new(), self.ttl));
                }
                Err(ResolutionError::DnsTimeout) if attempt < self.dns.retry.retries => {
                    let delay = self.dns.retry.delay_for(attempt);
                    debug!(domain, attempt, ?delay, "DNS timeout, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(domain, error = %err, "MX resolution failed");
                    return Err(err);
                }
            }
        }
    }
}
