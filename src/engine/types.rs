use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::score::Verdict;
use crate::smtp_verify::ProbeOutcome;

/// Résultat final pour une adresse d'entrée. Produit une seule fois, jamais
/// modifié ensuite.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRecord {
    pub email: String,
    pub is_syntax_valid: bool,
    pub has_mx: bool,
    pub is_deliverable: bool,
    pub is_catchall: bool,
    pub is_disposable: bool,
    /// 0–100.
    pub quality_score: u8,
    pub verdict: Verdict,
    /// Conclusion SMTP ; absente si aucune sonde n'a eu lieu.
    pub smtp_outcome: Option<ProbeOutcome>,
    pub validation_time: Duration,
    pub last_checked: DateTime<Utc>,
    /// Erreur terminale rendue en texte, le cas échéant.
    pub error: Option<String>,
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Dans l'ordre des adresses d'entrée.
    pub records: Vec<ValidationRecord>,
    /// Lot interrompu : les adresses non lancées n'ont pas d'enregistrement.
    pub interrupted: bool,
}

impl BatchReport {
    pub fn stats(&self) -> BatchStats {
        BatchStats::from_records(&self.records)
    }
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchStats {
    pub total: usize,
    pub valid_syntax: usize,
    pub has_mx: usize,
    pub not_disposable: usize,
    pub not_catchall: usize,
    pub deliverable: usize,
    pub avg_quality_score: f64,
}

impl BatchStats {
    pub fn from_records(records: &[ValidationRecord]) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Self::default()
        };
        let mut score_sum = 0u64;
        for record in records {
            stats.valid_syntax += usize::from(record.is_syntax_valid);
            stats.has_mx += usize::from(record.has_mx);
            stats.not_disposable += usize::from(!record.is_disposable);
            stats.not_catchall += usize::from(!record.is_catchall);
            stats.deliverable += usize::from(record.is_deliverable);
            score_sum += u64::from(record.quality_score);
        }
        if stats.total > 0 {
            stats.avg_quality_score = score_sum as f64 / stats.total as f64;
        }
        stats
    }
}
