//! SanctionScheduler processor.
//!
//! Upstream only grants timeouts of a fixed length. The scheduler keeps a
//! table of tracked sanctions and, for each, a `DynamicEnd` timer that
//! re-issues the grant and asks [`next_sanction_interval`] when to do so
//! next, so the last grant lapses exactly at the sanction's expiration.

use crate::clock::Clock;
use crate::timer::{CallbackError, RepeatingTimer, TimerControl, TimerId, TimerOptions};
use crate::utils::{SanctionInterval, next_sanction_interval};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SanctionId(pub i64);

impl std::fmt::Display for SanctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sanction#{}", self.0)
    }
}

/// Re-issues the fixed-length grant once.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SanctionError {
    #[error("renewal failed: {0}")]
    Refresh(#[source] CallbackError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanctionTracking {
    pub id: SanctionId,
    pub expiration: OffsetDateTime,
    pub last_decision: SanctionInterval,
    pub timer: Option<TimerId>,
    /// Distinguishes a restarted tracking from the one it replaced.
    generation: u64,
}

#[derive(Clone)]
pub struct SanctionScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    timer: RepeatingTimer,
    clock: Arc<dyn Clock>,
    grant: Duration,
    generation: AtomicU64,
    entries: Mutex<HashMap<SanctionId, SanctionTracking>>,
}

impl SanctionScheduler {
    /// `grant` is the fixed length of one upstream timeout.
    pub fn new(clock: Arc<dyn Clock>, grant: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                timer: RepeatingTimer::new(),
                clock,
                grant,
                generation: AtomicU64::new(0),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SanctionId, SanctionTracking>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `id` until `expiration`, renewing through `on_refresh`.
    ///
    /// An existing tracking of `id` is stopped first. With
    /// `start_immediately` one renewal is awaited before returning; its
    /// failure is returned and nothing is tracked. Returns the initial
    /// decision; `NoMore` creates no timer.
    pub async fn start_tracking<F, Fut>(
        &self,
        id: SanctionId,
        expiration: OffsetDateTime,
        start_immediately: bool,
        on_refresh: F,
    ) -> Result<SanctionInterval, SanctionError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        let on_refresh: RefreshFn = Arc::new(move || on_refresh().boxed());
        self.stop_tracking(id);

        let decision = next_sanction_interval(expiration, self.inner.clock.now(), self.inner.grant, None);
        info!(sanction_id = %id, %expiration, ?decision, start_immediately, "Tracking sanction");

        if start_immediately {
            on_refresh().await.map_err(SanctionError::Refresh)?;
        }

        let Some(delay) = decision.delay() else {
            return Ok(decision);
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.entries().insert(
            id,
            SanctionTracking {
                id,
                expiration,
                last_decision: decision,
                timer: None,
                generation,
            },
        );
        // A concurrent start for the same id finished its renewal first.
        if let Some(timer) = previous.and_then(|p| p.timer) {
            self.inner.timer.dispose(timer);
        }

        let scheduler = self.clone();
        let timer = self.inner.timer.create(TimerOptions::dynamic_end(Some(delay), move || {
            let scheduler = scheduler.clone();
            let on_refresh = on_refresh.clone();
            async move { scheduler.fire(id, generation, on_refresh).await }
        }));

        let mut entries = self.entries();
        match entries.get_mut(&id) {
            Some(entry) if entry.generation == generation => entry.timer = Some(timer),
            // Stopped or replaced while the timer was being created.
            _ => {
                drop(entries);
                self.inner.timer.dispose(timer);
            }
        }
        Ok(decision)
    }

    /// Stop renewing `id`. Returns `false` if it was not tracked.
    pub fn stop_tracking(&self, id: SanctionId) -> bool {
        let removed = self.entries().remove(&id);
        match removed {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    self.inner.timer.dispose(timer);
                }
                info!(sanction_id = %id, "Stopped tracking sanction");
                true
            }
            None => false,
        }
    }

    /// Latest decision for `id`, if tracked.
    pub fn decision(&self, id: SanctionId) -> Option<SanctionInterval> {
        self.entries().get(&id).map(|e| e.last_decision)
    }

    /// Snapshot of the tracking table, ordered by id.
    pub fn tracked(&self) -> Vec<SanctionTracking> {
        let mut tracked: Vec<_> = self.entries().values().cloned().collect();
        tracked.sort_by_key(|t| t.id);
        tracked
    }

    /// Stop every tracking.
    pub fn shutdown(&self) {
        let count = {
            let mut entries = self.entries();
            let count = entries.len();
            entries.clear();
            count
        };
        self.inner.timer.dispose_all();
        info!(count, "SanctionScheduler shutdown complete");
    }

    async fn fire(
        &self,
        id: SanctionId,
        generation: u64,
        on_refresh: RefreshFn,
    ) -> Result<TimerControl, CallbackError> {
        if !self.is_current(id, generation) {
            return Ok(TimerControl::Stop);
        }

        if let Err(e) = on_refresh().await {
            warn!(sanction_id = %id, error = %e, "Sanction renewal failed, tracking dropped");
            self.remove_if_current(id, generation);
            return Err(e);
        }

        let now = self.inner.clock.now();
        let mut entries = self.entries();
        let Some(entry) = entries
            .get_mut(&id)
            .filter(|entry| entry.generation == generation)
        else {
            debug!(sanction_id = %id, "Sanction stopped during renewal");
            return Ok(TimerControl::Stop);
        };

        let decision =
            next_sanction_interval(entry.expiration, now, self.inner.grant, Some(entry.last_decision));
        entry.last_decision = decision;
        debug!(sanction_id = %id, ?decision, "Sanction renewed");

        match decision.delay() {
            Some(delay) => Ok(TimerControl::Reschedule(delay)),
            None => {
                entries.remove(&id);
                info!(sanction_id = %id, "Final renewal issued, sanction lapses at expiration");
                Ok(TimerControl::Stop)
            }
        }
    }

    fn is_current(&self, id: SanctionId, generation: u64) -> bool {
        self.entries()
            .get(&id)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn remove_if_current(&self, id: SanctionId, generation: u64) {
        let mut entries = self.entries();
        if entries.get(&id).is_some_and(|e| e.generation == generation) {
            entries.remove(&id);
        }
    }
}
