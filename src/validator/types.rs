use std::fmt;

use thiserror::Error;

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    #[default]
    Strict,
    Relaxed,
}

/// Raison du rejet syntaxique. Seule la première faute rencontrée est
/// rapportée, dans l'ordre des contrôles de [`parse_address`](super::parse_address).
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxFault {
    #[error("missing '@' separator")]
    MissingAtSign,
    #[error("address too long")]
    TooLong,
    #[error("empty local part")]
    EmptyLocalPart,
    #[error("invalid local part")]
    InvalidLocalPart,
    #[error("invalid domain label")]
    InvalidDomainLabel,
}

/// Adresse syntaxiquement valide : partie locale telle quelle, domaine
/// converti en ASCII (IDNA) et en minuscules.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress {
    local: String,
    domain: String,
}

impl EmailAddress {
    pub(crate) fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}
