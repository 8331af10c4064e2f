use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::limiter::RunState;
use crate::cancel::CancelToken;
use crate::config::RetryPolicy;
use crate::mx::MxHost;
use crate::smtp_verify::{MailboxProbe, MailboxProber};

/// Enveloppe un [`MailboxProber`] : respecte les plafonds du lot et reprend
/// avec attente exponentielle les parcours qui n'ont rencontré que des
/// échecs réseau. Un parcours concluant ou ambigu n'est jamais repris.
pub(crate) struct Throttled<P> {
    inner: P,
    limits: Arc<RunState>,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl<P> Throttled<P> {
    pub(crate) fn new(inner: P, limits: Arc<RunState>, retry: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            inner,
            limits,
            retry,
            cancel,
        }
    }
}

#[async_trait]
impl<P: MailboxProber> MailboxProber for Throttled<P> {
    async fn probe(&self, domain: &str, hosts: &[MxHost], local: &str) -> MailboxProbe {
        let mut results = Vec::new();
        let mut attempt = 0;
        loop {
            let permit = tokio::select! {
                permit = self.limits.acquire(domain) => permit,
                _ = self.cancel.cancelled() => None,
            };
            let Some(permit) = permit else {
                break;
            };
            let probe = self.inner.probe(domain, hosts, local).await;
            drop(permit);

            let transient = probe.is_transient();
            results.extend(probe.results);
            if !transient {
                return MailboxProbe {
                    outcome: probe.outcome,
                    results,
                };
            }
            if attempt >= self.retry.retries {
                warn!(domain, attempts = attempt + 1, "probe retries exhausted");
                break;
            }
            let delay = self.retry.delay_for(attempt);
            debug!(domain, attempt, ?delay, "network failure, backing off");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => break,
            }
            attempt += 1;
        }
        MailboxProbe::from_results(results)
    }
}
