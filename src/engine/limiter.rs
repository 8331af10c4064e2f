use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep_until};

struct DomainSlot {
    permits: Arc<Semaphore>,
    next_start: Option<Instant>,
}

/// Plafonds de concurrence d'un lot : connexions globales, sondes par
/// domaine, et écart minimal entre deux départs vers un même domaine.
pub(crate) struct RunState {
    global: Arc<Semaphore>,
    per_domain: usize,
    spacing: Duration,
    domains: Mutex<HashMap<String, DomainSlot>>,
}

/// Droit de sonder ; libéré à la destruction.
pub(crate) struct ProbePermit {
    _domain: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl RunState {
    pub(crate) fn new(global: usize, per_domain: usize, spacing: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global)),
            per_domain,
            spacing,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Attend une place pour `domain` puis son créneau de départ, enfin une
    /// place globale. `None` si les sémaphores sont fermés.
    pub(crate) async fn acquire(&self, domain: &str) -> Option<ProbePermit> {
        let slot = self.domain_permits(domain);
        let domain_permit = slot.acquire_owned().await.ok()?;
        let start = self.reserve_start(domain);
        if start > Instant::now() {
            sleep_until(start).await;
        }
        let global_permit = self.global.clone().acquire_owned().await.ok()?;
        Some(ProbePermit {
            _domain: domain_permit,
            _global: global_permit,
        })
    }

    fn domain_permits(&self, domain: &str) -> Arc<Semaphore> {
        let mut domains = self.domains.lock().unwrap_or_else(PoisonError::into_inner);
        domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainSlot {
                permits: Arc::new(Semaphore::new(self.per_domain)),
                next_start: None,
            })
            .permits
            .clone()
    }

    fn reserve_start(&self, domain: &str) -> Instant {
        let now = Instant::now();
        let mut domains = self.domains.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = domains.get_mut(domain) else {
            return now;
        };
        let start = slot.next_start.map_or(now, |next| next.max(now));
        slot.next_start = Some(start + self.spacing);
        start
    }
}
