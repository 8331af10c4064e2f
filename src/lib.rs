#![forbid(unsafe_code)]
//! mailprobe — vérification de délivrabilité e-mail sans envoi de message.
//!
//! Chaîne par adresse : contrôle syntaxique, résolution MX (cache partagé),
//! sonde SMTP, détection catch-all (mémorisée par domaine), domaines jetables,
//! puis score 0–100. [`Engine`] orchestre des lots sous plafonds de
//! concurrence et politique de nouvelles tentatives.

pub mod cancel;
pub mod catchall;
pub mod config;
pub mod disposable;
pub mod engine;
pub mod error;
pub mod mx;
pub mod score;
pub mod smtp_verify;
pub mod validator;

pub use cancel::CancelToken;
pub use catchall::{CatchallDetector, CatchallRecord};
pub use config::{CacheConfig, ConfigError, DnsOptions, Egress, EngineConfig, RetryPolicy};
pub use disposable::DisposableRegistry;
pub use engine::{BatchReport, BatchStats, Engine, ValidationRecord};
pub use error::{EngineError, ProbeError};
pub use mx::{DnsResolver, LookupMx, MxAnswer, MxCache, MxHost, MxRecord, ResolutionError};
pub use score::{Assessment, ScoreBand, Signals, Verdict, aggregate};
pub use smtp_verify::{
    MailboxProbe, MailboxProber, ProbeOptions, ProbeOutcome, ProbeResult, ProbeStage, SmtpProber,
    Transport, TransportError,
};
pub use validator::{EmailAddress, SyntaxFault, ValidationMode, is_valid_syntax, parse_address};
