use std::time::{Duration, Instant};

use async_trait::async_trait;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::system_conf::read_system_conf;

use super::{MxHost, ResolutionError};

/// Réponse MX brute : hôtes dans l'ordre reçu et TTL restant de la réponse,
/// quand le résolveur le connaît.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MxAnswer {
    pub hosts: Vec<MxHost>,
    pub ttl: Option<Duration>,
}

impl From<Vec<MxHost>> for MxAnswer {
    fn from(hosts: Vec<MxHost>) -> Self {
        Self { hosts, ttl: None }
    }
}

/// Requêtes DNS nécessaires au résolveur de domaines.
///
/// Une absence d'enregistrement (NXDOMAIN, réponse vide) n'est pas une
/// erreur : `lookup_mx` renvoie une liste vide et `has_address` `false`.
#[async_trait]
pub trait LookupMx: Send + Sync {
    async fn lookup_mx(&self, domain: &str) -> Result<MxAnswer, ResolutionError>;

    async fn has_address(&self, domain: &str) -> Result<bool, ResolutionError>;
}

/// Résolveur système basé sur `trust-dns-resolver`.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Lit la configuration système ; les nouvelles tentatives internes sont
    /// désactivées, le cache MX s'en charge.
    pub fn from_system_conf(timeout: Duration) -> Result<Self, ResolutionError> {
        let (config, mut opts) = read_system_conf().map_err(ResolutionError::resolver_init)?;
        opts.timeout = timeout;
        opts.attempts = 1;
        Ok(Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

#[async_trait]
impl LookupMx for DnsResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<MxAnswer, ResolutionError> {
        match self.inner.mx_lookup(domain).await {
            Ok(lookup) => {
                let hosts = lookup
                    .iter()
                    .map(|mx| MxHost::new(mx.preference(), normalize_exchange(&mx.exchange().to_utf8())))
                    .collect();
                let ttl = lookup
                    .as_lookup()
                    .valid_until()
                    .saturating_duration_since(Instant::now());
                Ok(MxAnswer {
                    hosts,
                    ttl: Some(ttl),
                })
            }
            Err(err) => empty_or_error(err).map(MxAnswer::from),
        }
    }

    async fn has_address(&self, domain: &str) -> Result<bool, ResolutionError> {
        match self.inner.lookup_ip(domain).await {
            Ok(lookup) => Ok(lookup.iter().next().is_some()),
            Err(err) => empty_or_error(err).map(|_: Vec<MxHost>| false),
        }
    }
}

fn empty_or_error<T>(err: ResolveError) -> Result<Vec<T>, ResolutionError> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
        ResolveErrorKind::Timeout => Err(ResolutionError::DnsTimeout),
        _ => Err(ResolutionError::lookup(err)),
    }
}

/// Hôtes à essayer pour `domain`, par préférence croissante, avec le TTL
/// de la réponse MX.
///
/// Sans MX, retombe sur l'enregistrement d'adresse du domaine (MX implicite,
/// RFC 5321 §5.1). Un MX nul (RFC 7505) signifie que le domaine refuse tout
/// courrier.
pub(crate) async fn resolve_with<R>(
    resolver: &R,
    domain: &str,
    max_hosts: usize,
) -> Result<MxAnswer, ResolutionError>
where
    R: LookupMx + ?Sized,
{
    let MxAnswer { mut hosts, ttl } = resolver.lookup_mx(domain).await?;
    hosts.sort();
    hosts.dedup();

    if hosts.len() == 1 && hosts[0].exchange.is_empty() {
        return Err(ResolutionError::DomainNotFound);
    }
    hosts.retain(|h| !h.exchange.is_empty());

    if hosts.is_empty() {
        if resolver.has_address(domain).await? {
            return Ok(MxAnswer::from(vec![MxHost::new(0, domain)]));
        }
        return Err(ResolutionError::DomainNotFound);
    }

    hosts.truncate(max_hosts.max(1));
    Ok(MxAnswer { hosts, ttl })
}

pub(crate) fn normalize_exchange(exchange: &str) -> String {
    exchange.trim_end_matches('.').to_ascii_lowercase()
}
