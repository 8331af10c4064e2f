use thiserror::Error;

use crate::config::ConfigError;
use crate::mx::ResolutionError;
use crate::smtp_verify::{ProbeStage, TransportError};
use crate::validator::SyntaxFault;

/// Erreur terminale du traitement d'une adresse. Jamais propagée à
/// l'appelant : elle est rendue dans le champ `error` du
/// [`ValidationRecord`](crate::ValidationRecord).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxFault),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("transport to {host}:{port} failed: {message}")]
    Transport {
        host: String,
        port: u16,
        message: String,
    },
    #[error("{host}:{port} did not answer {stage} in time")]
    ProtocolTimeout {
        host: String,
        port: u16,
        stage: ProbeStage,
    },
    #[error("{host} refused at {stage}{}", .code.map(|c| format!(" ({c})")).unwrap_or_default())]
    ProtocolRejection {
        host: String,
        stage: ProbeStage,
        code: Option<u16>,
    },
}

/// Échec de construction du moteur.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolver(#[from] ResolutionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("runtime initialization failed: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
}
