use thiserror::Error;

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("domain has no MX and no address record")]
    DomainNotFound,
    #[error("DNS query timed out")]
    DnsTimeout,
    #[error("DNS lookup failed: {message}")]
    Lookup { message: String },
    #[error("resolver initialization failed: {message}")]
    ResolverInit { message: String },
}

impl ResolutionError {
    pub(crate) fn lookup(err: impl std::fmt::Display) -> Self {
        Self::Lookup {
            message: err.to_string(),
        }
    }

    pub(crate) fn resolver_init(err: impl std::fmt::Display) -> Self {
        Self::ResolverInit {
            message: err.to_string(),
        }
    }
}
