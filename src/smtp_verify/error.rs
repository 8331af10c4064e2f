use thiserror::Error;

use super::{ProbeOutcome, ProbeStage};

/// Échec d'ouverture ou de sécurisation d'un flux.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// Chemin de sortie (proxy) indisponible ou ayant refusé le tunnel.
    #[error("egress unavailable: {message}")]
    Unavailable { message: String },
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: native_tls::Error,
    },
    #[error("TLS connector initialization failed: {source}")]
    TlsInit {
        #[source]
        source: native_tls::Error,
    },
}

impl TransportError {
    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Échec au cours d'une conversation déjà établie.
#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("no reply during {stage}")]
    Timeout { stage: ProbeStage },
    #[error("I/O error during {stage}: {source}")]
    Io {
        stage: ProbeStage,
        #[source]
        source: std::io::Error,
    },
    #[error("protocol error during {stage}: {message}")]
    Protocol { stage: ProbeStage, message: String },
    #[error("STARTTLS upgrade failed: {source}")]
    Upgrade {
        #[source]
        source: TransportError,
    },
    #[error("session already closed")]
    Closed,
}

impl SessionError {
    pub(crate) fn outcome(&self) -> ProbeOutcome {
        match self {
            Self::Timeout { .. } => ProbeOutcome::Timeout,
            Self::Protocol { .. } => ProbeOutcome::Ambiguous,
            Self::Io { .. } | Self::Upgrade { .. } | Self::Closed => ProbeOutcome::ConnectionError,
        }
    }
}
