//! Agrégation des signaux en un score de qualité 0–100.
//!
//! Ordre retenu : syntaxe invalide < pas de MX < refus SMTP < incertain
//! (ambigu, timeout) < accepté sur un domaine catch-all < accepté. Le
//! caractère jetable retire une pénalité fixe quel que soit le reste.

use std::fmt;

use crate::smtp_verify::ProbeOutcome;

pub const NO_MX_SCORE: u8 = 10;
pub const REJECTED_SCORE: u8 = 20;
pub const UNCERTAIN_SCORE: u8 = 50;
pub const CATCHALL_SCORE: u8 = 65;
pub const ACCEPTED_SCORE: u8 = 95;
pub const DISPOSABLE_PENALTY: u8 = 30;

/// Entrées de l'agrégateur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    pub syntax_valid: bool,
    pub has_mx: bool,
    /// Absent quand aucune sonde n'a été conduite.
    pub smtp: Option<ProbeOutcome>,
    pub is_catchall: bool,
    pub is_disposable: bool,
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with-serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Invalid,
    NoMailServer,
    Undeliverable,
    Unknown,
    CatchAll,
    Deliverable,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Invalid => "invalid",
            Self::NoMailServer => "no mail server",
            Self::Undeliverable => "undeliverable",
            Self::Unknown => "unknown",
            Self::CatchAll => "catch-all",
            Self::Deliverable => "deliverable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScoreBand {
    Zero,
    Low,
    Medium,
    High,
}

impl ScoreBand {
    pub fn of(score: u8) -> Self {
        match score {
            0 => Self::Zero,
            1..=39 => Self::Low,
            40..=79 => Self::Medium,
            _ => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub quality_score: u8,
    pub verdict: Verdict,
}

impl Assessment {
    pub fn band(&self) -> ScoreBand {
        ScoreBand::of(self.quality_score)
    }
}

pub fn aggregate(signals: &Signals) -> Assessment {
    if !signals.syntax_valid {
        return Assessment {
            quality_score: 0,
            verdict: Verdict::Invalid,
        };
    }
    let (base, verdict) = if !signals.has_mx {
        (NO_MX_SCORE, Verdict::NoMailServer)
    } else {
        match signals.smtp {
            Some(ProbeOutcome::Accepted) if signals.is_catchall => (CATCHALL_SCORE, Verdict::CatchAll),
            Some(ProbeOutcome::Accepted) => (ACCEPTED_SCORE, Verdict::Deliverable),
            Some(ProbeOutcome::Rejected) => (REJECTED_SCORE, Verdict::Undeliverable),
            _ => (UNCERTAIN_SCORE, Verdict::Unknown),
        }
    };
    let quality_score = if signals.is_disposable {
        base.saturating_sub(DISPOSABLE_PENALTY)
    } else {
        base
    };
    Assessment {
        quality_score,
        verdict,
    }
}
