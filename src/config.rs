//! Configuration du moteur de vérification.
//!
//! Toutes les options ont une valeur par défaut raisonnable ; appeler
//! [`EngineConfig::validate`] avant de construire le moteur.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::smtp_verify::ProbeOptions;
use crate::validator::ValidationMode;

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Nombre d'adresses traitées en parallèle.
    pub workers: usize,
    /// Sondes SMTP simultanées autorisées vers un même domaine.
    pub per_domain_limit: usize,
    /// Connexions SMTP ouvertes simultanément, tous domaines confondus.
    pub global_connection_limit: usize,
    /// Écart minimal entre deux sondes consécutives vers un même domaine.
    pub min_domain_spacing: Duration,
    pub validation_mode: ValidationMode,
    pub probe: ProbeOptions,
    pub retry: RetryPolicy,
    pub dns: DnsOptions,
    pub cache: CacheConfig,
    pub egress: Egress,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            per_domain_limit: 1,
            global_connection_limit: 32,
            min_domain_spacing: Duration::from_secs(1),
            validation_mode: ValidationMode::Strict,
            probe: ProbeOptions::default(),
            retry: RetryPolicy::default(),
            dns: DnsOptions::default(),
            cache: CacheConfig::default(),
            egress: Egress::Direct,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero("workers"));
        }
        if self.per_domain_limit == 0 {
            return Err(ConfigError::Zero("per_domain_limit"));
        }
        if self.global_connection_limit == 0 {
            return Err(ConfigError::Zero("global_connection_limit"));
        }
        if self.probe.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        if self.probe.connect_timeout.is_zero() || self.probe.read_timeout.is_zero() {
            return Err(ConfigError::Zero("probe timeout"));
        }
        if self.dns.timeout.is_zero() {
            return Err(ConfigError::Zero("dns timeout"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::BackoffInverted {
                base: self.retry.base_delay,
                cap: self.retry.max_delay,
            });
        }
        Ok(())
    }
}

/// Nouvelles tentatives avec attente exponentielle plafonnée.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Tentatives supplémentaires après la première.
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Attente avant la tentative `attempt + 1` : `base * 2^attempt`, plafonnée.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for DnsOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                retries: 2,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
            },
        }
    }
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub mx_ttl: Duration,
    pub catchall_ttl: Duration,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mx_ttl: Duration::from_secs(6 * 3600),
            catchall_ttl: Duration::from_secs(6 * 3600),
            max_entries: 10_000,
        }
    }
}

/// Chemin de sortie réseau des connexions SMTP.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Egress {
    #[default]
    Direct,
    Socks5 { proxy: SocketAddr },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("at least one SMTP port is required")]
    NoPorts,
    #[error("backoff base {base:?} exceeds cap {cap:?}")]
    BackoffInverted { base: Duration, cap: Duration },
}
