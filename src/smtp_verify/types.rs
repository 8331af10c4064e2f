use std::fmt;
use std::time::Duration;

#[cfg(feature = "with-serde")]
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// Réponse SMTP brute : code numérique et lignes de texte.
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl SmtpReply {
    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_transient_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|token| token.eq_ignore_ascii_case(cap))
        })
    }
}

/// États de la conversation de sonde.
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Connect,
    Greet,
    Hello,
    StartTls,
    MailFrom,
    RcptTo,
    Close,
}

impl fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Greet => "greeting",
            Self::Hello => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Close => "QUIT",
        };
        f.write_str(name)
    }
}

/// Entrée du transcript d'une tentative.
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpEvent {
    Sent { stage: ProbeStage, command: String },
    Received { stage: ProbeStage, reply: SmtpReply },
    Error { stage: ProbeStage, message: String },
}

#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOutcome {
    /// La boîte a été acceptée au `RCPT TO`.
    Accepted,
    /// Refus explicite : boîte inconnue (550/551/553), bannière ou
    /// `MAIL FROM` refusés.
    Rejected,
    /// Le serveur a répondu sans trancher (4xx, 5xx de politique, greylisting).
    Ambiguous,
    Timeout,
    ConnectionError,
}

impl ProbeOutcome {
    pub fn is_conclusive(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    pub fn is_network_failure(self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionError)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Ambiguous => "ambiguous",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection error",
        };
        f.write_str(name)
    }
}

/// Une tentative contre un couple (hôte, port). Immuable une fois produite.
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub host: String,
    pub port: u16,
    pub outcome: ProbeOutcome,
    /// Étape à laquelle la conversation s'est conclue.
    pub stage: ProbeStage,
    pub latency: Duration,
    pub code: Option<u16>,
    pub detail: Option<String>,
    pub events: Vec<SmtpEvent>,
}

/// Résultat du parcours hôtes × ports pour une boîte.
///
/// `outcome` vaut `Accepted`, `Rejected` ou `Ambiguous` ; un parcours épuisé
/// sans réponse concluante donne `Ambiguous`, et [`is_transient`] indique si
/// aucun serveur n'a seulement répondu (échecs réseau uniquement).
///
/// [`is_transient`]: MailboxProbe::is_transient
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxProbe {
    pub outcome: ProbeOutcome,
    pub results: Vec<ProbeResult>,
}

impl MailboxProbe {
    pub(crate) fn from_results(results: Vec<ProbeResult>) -> Self {
        let outcome = results
            .iter()
            .map(|r| r.outcome)
            .find(|o| o.is_conclusive())
            .unwrap_or(ProbeOutcome::Ambiguous);
        Self { outcome, results }
    }

    pub fn is_transient(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.outcome.is_network_failure())
    }

    pub fn last_code(&self) -> Option<u16> {
        self.results.iter().rev().find_map(|r| r.code)
    }

    pub fn attempts(&self) -> usize {
        self.results.len()
    }

    /// Erreur terminale à rapporter pour ce parcours, s'il y en a une.
    pub fn error(&self) -> Option<ProbeError> {
        let last = self.results.last()?;
        match self.outcome {
            ProbeOutcome::Accepted => None,
            ProbeOutcome::Rejected => self
                .results
                .iter()
                .find(|r| r.outcome == ProbeOutcome::Rejected)
                .map(|r| ProbeError::ProtocolRejection {
                    host: r.host.clone(),
                    stage: r.stage,
                    code: r.code,
                }),
            _ if !self.is_transient() => None,
            _ if last.outcome == ProbeOutcome::Timeout => Some(ProbeError::ProtocolTimeout {
                host: last.host.clone(),
                port: last.port,
                stage: last.stage,
            }),
            _ => Some(ProbeError::Transport {
                host: last.host.clone(),
                port: last.port,
                message: last
                    .detail
                    .clone()
                    .unwrap_or_else(|| "connection failed".to_string()),
            }),
        }
    }
}
