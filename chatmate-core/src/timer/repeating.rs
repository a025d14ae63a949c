use super::{
    CallbackError, DynamicTimerCallback, TimerBehaviour, TimerCallback, TimerControl, TimerError,
    TimerHandle, TimerId, TimerOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

/// `interval_at` rejects a zero period.
const MIN_START_PERIOD: Duration = Duration::from_millis(1);

/// Table of repeating timers.
///
/// Cloning is cheap and every clone shares the same table. All bookkeeping
/// (behaviour, current interval, disposed flag) lives in the table; the
/// driver task of each timer only holds its callback and a receiver for the
/// disposed flag.
#[derive(Clone, Default)]
pub struct RepeatingTimer {
    inner: Arc<TimerTable>,
}

#[derive(Default)]
struct TimerTable {
    next_id: AtomicU64,
    slots: Mutex<HashMap<TimerId, TimerSlot>>,
}

struct TimerSlot {
    behaviour: TimerBehaviour,
    current_interval: Duration,
    disposed_tx: watch::Sender<bool>,
}

impl RepeatingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer whose first firing happens asynchronously after the
    /// configured delay.
    pub fn create(&self, options: TimerOptions) -> TimerId {
        let delay = options.initial_delay();
        let (id, disposed_rx) = self.register(&options);
        debug!(timer_id = %id, behaviour = ?options.behaviour(), ?delay, "Timer created");
        tokio::spawn(self.clone().drive(id, disposed_rx, options, delay));
        id
    }

    /// Register a timer and await its first firing before returning.
    ///
    /// `Start` and `End` timers fire right away. A `DynamicEnd` timer waits
    /// for its `initial_interval` (if any) first. An error from the first
    /// callback is returned here and the timer is discarded.
    pub async fn create_immediate(&self, options: TimerOptions) -> Result<TimerId, TimerError> {
        let (id, mut disposed_rx) = self.register(&options);
        debug!(timer_id = %id, behaviour = ?options.behaviour(), "Timer created, firing immediately");

        let next_delay = match &options {
            TimerOptions::Start { interval, callback } => {
                let started = Instant::now();
                self.first_firing(id, callback()).await?;
                // Start discipline: the period is measured from when the
                // first firing began, not from now.
                interval.saturating_sub(started.elapsed())
            }
            TimerOptions::End { interval, callback } => {
                self.first_firing(id, callback()).await?;
                *interval
            }
            TimerOptions::DynamicEnd {
                initial_interval,
                callback,
            } => {
                if let Some(initial) = initial_interval {
                    if !wait(&mut disposed_rx, *initial).await {
                        return Ok(id);
                    }
                }
                match self.first_firing(id, callback()).await? {
                    TimerControl::Reschedule(next) => {
                        self.set_interval(id, next);
                        next
                    }
                    TimerControl::Stop => {
                        self.dispose(id);
                        return Ok(id);
                    }
                }
            }
        };

        if *disposed_rx.borrow() {
            return Ok(id);
        }
        tokio::spawn(self.clone().drive(id, disposed_rx, options, next_delay));
        Ok(id)
    }

    /// Stop all future firings of `id`. Returns `false` if the id is unknown
    /// (never created, already disposed, or stopped by itself).
    pub fn dispose(&self, id: TimerId) -> bool {
        let slot = self.slots().remove(&id);
        match slot {
            Some(slot) => {
                slot.disposed_tx.send_replace(true);
                debug!(timer_id = %id, "Timer disposed");
                true
            }
            None => false,
        }
    }

    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.slots().drain().collect();
        for (id, slot) in drained {
            slot.disposed_tx.send_replace(true);
            debug!(timer_id = %id, "Timer disposed");
        }
    }

    pub fn handle(&self, id: TimerId) -> Option<TimerHandle> {
        self.slots().get(&id).map(|slot| TimerHandle {
            id,
            behaviour: slot.behaviour,
            current_interval: slot.current_interval,
            disposed: *slot.disposed_tx.borrow(),
        })
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.slots().contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.slots().len()
    }

    // -- Private helpers ----------------------------------------------------

    fn slots(&self) -> MutexGuard<'_, HashMap<TimerId, TimerSlot>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, options: &TimerOptions) -> (TimerId, watch::Receiver<bool>) {
        let id = TimerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (disposed_tx, disposed_rx) = watch::channel(false);
        self.slots().insert(
            id,
            TimerSlot {
                behaviour: options.behaviour(),
                current_interval: options.initial_delay(),
                disposed_tx,
            },
        );
        (id, disposed_rx)
    }

    fn set_interval(&self, id: TimerId, interval: Duration) {
        if let Some(slot) = self.slots().get_mut(&id) {
            slot.current_interval = interval;
        }
    }

    async fn first_firing<T>(
        &self,
        id: TimerId,
        firing: impl Future<Output = Result<T, CallbackError>>,
    ) -> Result<T, TimerError> {
        firing.await.map_err(|e| {
            self.dispose(id);
            TimerError::Callback(e)
        })
    }

    async fn drive(
        self,
        id: TimerId,
        disposed_rx: watch::Receiver<bool>,
        options: TimerOptions,
        first_delay: Duration,
    ) {
        match options {
            TimerOptions::Start { interval, callback } => {
                self.drive_start(id, disposed_rx, interval, callback, first_delay)
                    .await
            }
            TimerOptions::End { interval, callback } => {
                self.drive_end(id, disposed_rx, interval, callback, first_delay)
                    .await
            }
            TimerOptions::DynamicEnd { callback, .. } => {
                self.drive_dynamic(id, disposed_rx, callback, first_delay)
                    .await
            }
        }
    }

    async fn drive_start(
        self,
        id: TimerId,
        mut disposed_rx: watch::Receiver<bool>,
        interval: Duration,
        callback: TimerCallback,
        first_delay: Duration,
    ) {
        let period = interval.max(MIN_START_PERIOD);
        let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, period);
        // Late ticks are caught up rather than skipped: an overrunning
        // callback never costs a firing.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            tokio::select! {
                biased;

                _ = disposed(&mut disposed_rx) => break,

                _ = ticker.tick() => {
                    let callback = callback.clone();
                    let timers = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = callback().await {
                            error!(timer_id = %id, error = %e, "Timer callback failed, timer stopped");
                            timers.dispose(id);
                        }
                    });
                }
            }
        }
    }

    async fn drive_end(
        self,
        id: TimerId,
        mut disposed_rx: watch::Receiver<bool>,
        interval: Duration,
        callback: TimerCallback,
        first_delay: Duration,
    ) {
        let mut delay = first_delay;
        loop {
            if !wait(&mut disposed_rx, delay).await {
                break;
            }
            if let Err(e) = callback().await {
                error!(timer_id = %id, error = %e, "Timer callback failed, timer stopped");
                self.dispose(id);
                break;
            }
            if *disposed_rx.borrow() {
                debug!(timer_id = %id, "Timer disposed while firing, not rescheduling");
                break;
            }
            delay = interval;
        }
    }

    async fn drive_dynamic(
        self,
        id: TimerId,
        mut disposed_rx: watch::Receiver<bool>,
        callback: DynamicTimerCallback,
        first_delay: Duration,
    ) {
        let mut delay = first_delay;
        loop {
            if !wait(&mut disposed_rx, delay).await {
                break;
            }
            let control = match callback().await {
                Ok(control) => control,
                Err(e) => {
                    error!(timer_id = %id, error = %e, "Timer callback failed, timer stopped");
                    self.dispose(id);
                    break;
                }
            };
            if *disposed_rx.borrow() {
                debug!(timer_id = %id, "Timer disposed while firing, not rescheduling");
                break;
            }
            match control {
                TimerControl::Reschedule(next) => {
                    self.set_interval(id, next);
                    delay = next;
                }
                TimerControl::Stop => {
                    debug!(timer_id = %id, "Timer stopped by its callback");
                    self.dispose(id);
                    break;
                }
            }
        }
    }
}

/// Sleep for `delay`. Returns `false` if the timer was disposed first.
async fn wait(disposed_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *disposed_rx.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        _ = disposed(disposed_rx) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Resolves once the disposed flag is raised (or its sender is gone).
async fn disposed(disposed_rx: &mut watch::Receiver<bool>) {
    let _ = disposed_rx.wait_for(|disposed| *disposed).await;
}
