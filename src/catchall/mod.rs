//! Détection des domaines « catch-all ».
//!
//! Une boîte aléatoire, qui ne devrait exister nulle part, est sondée une
//! fois par domaine ; la conclusion est gardée en cache pour toute la durée
//! de vie configurée et sert à toutes les adresses du domaine. Une sonde qui
//! n'a rencontré que des échecs réseau, ou qui a été interrompue, n'est pas
//! mémorisée : la prochaine adresse acceptée du domaine la relance.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::mx::MxHost;
use crate::smtp_verify::{MailboxProber, ProbeOutcome, confidence_for, random_local_part};

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CatchallRecord {
    pub domain: String,
    pub is_catchall: bool,
    pub checked_at: DateTime<Utc>,
    /// 0.0–1.0 ; faible quand la sonde n'a rien pu conclure.
    pub confidence: f32,
}

/// Cache partagé des conclusions catch-all, une sonde en vol par domaine.
pub struct CatchallDetector {
    entries: Cache<String, CatchallRecord>,
}

impl CatchallDetector {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { entries }
    }

    /// Conclusion pour `domain`, sondée au besoin via `prober`. Les appels
    /// concurrents pour un même domaine partagent la même sonde.
    pub async fn check(
        &self,
        domain: &str,
        hosts: &[MxHost],
        prober: &dyn MailboxProber,
        cancel: &CancelToken,
    ) -> CatchallRecord {
        self.entries
            .try_get_with(domain.to_string(), detect(domain, hosts, prober, cancel))
            .await
            .unwrap_or_else(|uncached| (*uncached).clone())
    }

    pub async fn cached(&self, domain: &str) -> Option<CatchallRecord> {
        self.entries.get(domain).await
    }
}

/// `Err` porte une conclusion à ne pas mettre en cache.
async fn detect(
    domain: &str,
    hosts: &[MxHost],
    prober: &dyn MailboxProber,
    cancel: &CancelToken,
) -> Result<CatchallRecord, CatchallRecord> {
    let local = random_local_part(16);
    debug!(domain, local = %local, "catch-all probe");
    let probe = prober.probe(domain, hosts, &local).await;
    let is_catchall = probe.outcome == ProbeOutcome::Accepted;
    let inconclusive = probe.results.is_empty() || probe.is_transient() || cancel.is_cancelled();
    let confidence = if inconclusive {
        confidence_for(ProbeOutcome::Timeout)
    } else {
        confidence_for(probe.outcome)
    };
    let record = CatchallRecord {
        domain: domain.to_string(),
        is_catchall,
        checked_at: Utc::now(),
        confidence,
    };
    if inconclusive {
        info!(domain, outcome = %probe.outcome, "catch-all check inconclusive, not cached");
        return Err(record);
    }
    info!(domain, is_catchall, confidence, outcome = %probe.outcome, "catch-all checked");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::smtp_verify::{MailboxProbe, ProbeResult, ProbeStage};

    struct FixedProber {
        outcomes: Mutex<Vec<ProbeOutcome>>,
        calls: AtomicUsize,
        locals: Mutex<Vec<String>>,
    }

    impl FixedProber {
        fn new(outcome: ProbeOutcome) -> Self {
            Self::sequence(&[outcome])
        }

        /// Une issue par appel ; la dernière se répète.
        fn sequence(outcomes: &[ProbeOutcome]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().rev().copied().collect()),
                calls: AtomicUsize::new(0),
                locals: Mutex::new(Vec::new()),
            }
        }

        fn next_outcome(&self) -> ProbeOutcome {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop().unwrap()
            } else {
                outcomes[0]
            }
        }
    }

    #[async_trait]
    impl MailboxProber for FixedProber {
        async fn probe(&self, _domain: &str, hosts: &[MxHost], local: &str) -> MailboxProbe {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.locals.lock().unwrap().push(local.to_string());
            let outcome = self.next_outcome();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let result = ProbeResult {
                host: hosts[0].exchange.clone(),
                port: 25,
                outcome,
                stage: ProbeStage::RcptTo,
                latency: Duration::from_millis(50),
                code: None,
                detail: None,
                events: Vec::new(),
            };
            MailboxProbe {
                outcome,
                results: vec![result],
            }
        }
    }

    fn hosts() -> Vec<MxHost> {
        vec![MxHost::new(10, "mx.example.com")]
    }

    #[tokio::test]
    async fn accepted_random_mailbox_means_catchall() {
        let detector = CatchallDetector::new(Duration::from_secs(60), 100);
        let prober = FixedProber::new(ProbeOutcome::Accepted);
        let record = detector.check("example.com", &hosts(), &prober, &CancelToken::new()).await;
        assert!(record.is_catchall);
        assert!(record.confidence > 0.9);
        let local = prober.locals.lock().unwrap()[0].clone();
        assert!(local.starts_with("probe-"));
    }

    #[tokio::test]
    async fn rejected_random_mailbox_is_not_catchall() {
        let detector = CatchallDetector::new(Duration::from_secs(60), 100);
        let prober = FixedProber::new(ProbeOutcome::Rejected);
        let record = detector.check("example.com", &hosts(), &prober, &CancelToken::new()).await;
        assert!(!record.is_catchall);
        assert!(record.confidence > 0.9);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_is_low_confidence() {
        let detector = CatchallDetector::new(Duration::from_secs(60), 100);
        let prober = FixedProber::new(ProbeOutcome::Timeout);
        let record = detector.check("example.com", &hosts(), &prober, &CancelToken::new()).await;
        assert!(!record.is_catchall);
        assert!(record.confidence < 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_checks_share_one_probe() {
        let detector = Arc::new(CatchallDetector::new(Duration::from_secs(60), 100));
        let prober = Arc::new(FixedProber::new(ProbeOutcome::Accepted));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let detector = detector.clone();
                let prober = prober.clone();
                tokio::spawn(async move {
                    detector
                        .check("example.com", &hosts(), prober.as_ref(), &CancelToken::new())
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_catchall);
        }
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

        // deuxième passage : servi par le cache
        detector
            .check("example.com", &hosts(), prober.as_ref(), &CancelToken::new())
            .await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert!(detector.cached("example.com").await.is_some());
        assert!(detector.cached("other.test").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_is_not_remembered() {
        let detector = CatchallDetector::new(Duration::from_secs(60), 100);
        let prober = FixedProber::sequence(&[ProbeOutcome::Timeout, ProbeOutcome::Accepted]);
        let cancel = CancelToken::new();

        let first = detector.check("example.com", &hosts(), &prober, &cancel).await;
        assert!(!first.is_catchall);
        assert!(detector.cached("example.com").await.is_none());

        let second = detector.check("example.com", &hosts(), &prober, &cancel).await;
        assert!(second.is_catchall);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert!(detector.cached("example.com").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_check_is_not_remembered() {
        let detector = CatchallDetector::new(Duration::from_secs(60), 100);
        let prober = FixedProber::new(ProbeOutcome::Ambiguous);
        let cancel = CancelToken::new();
        cancel.cancel();
        let record = detector.check("example.com", &hosts(), &prober, &cancel).await;
        assert!(record.confidence < 0.5);
        assert!(detector.cached("example.com").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_answer_is_remembered() {
        let detector = CatchallDetector::new(Duration::from_secs(60), 100);
        let prober = FixedProber::new(ProbeOutcome::Ambiguous);
        let record = detector
            .check("example.com", &hosts(), &prober, &CancelToken::new())
            .await;
        assert!(!record.is_catchall);
        assert!(detector.cached("example.com").await.is_some());
    }

    #[tokio::test]
    async fn conclusion_expires_after_ttl() {
        let detector = CatchallDetector::new(Duration::from_millis(100), 100);
        let prober = FixedProber::new(ProbeOutcome::Rejected);
        let cancel = CancelToken::new();

        detector.check("example.com", &hosts(), &prober, &cancel).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(detector.cached("example.com").await.is_none());
        detector.check("example.com", &hosts(), &prober, &cancel).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
    }
}
