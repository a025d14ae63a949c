//! IngestionLoop processor.
//!
//! One loop per stream. Each tick polls once, persists the batch together
//! with its continuation token, and returns the delay before the next tick.
//! Driven by a `DynamicEnd` timer, so the next poll is only scheduled after
//! the current one has been fully persisted.

use crate::clock::Clock;
use crate::processors::poll_client::PollClient;
use crate::store::EventStore;
use crate::timer::{CallbackError, TimerControl, TimerOptions};
use crate::utils::IntervalEstimator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Shared flag that permanently stops a stream's ingestion.
#[derive(Debug, Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    pub fn halt(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// In-memory view of the continuation cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    /// Not read from the store yet.
    Unloaded,
    /// `None` restarts from the beginning of the stream.
    Loaded(Option<String>),
}

/// Clears the in-flight flag when a tick ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct IngestionLoop {
    inner: Arc<Inner>,
}

struct Inner {
    client: PollClient,
    store: Arc<dyn EventStore>,
    estimator: IntervalEstimator,
    clock: Arc<dyn Clock>,
    cursor: Mutex<Cursor>,
    in_flight: AtomicBool,
    halt: HaltSignal,
}

impl IngestionLoop {
    pub fn new(
        client: PollClient,
        store: Arc<dyn EventStore>,
        estimator: IntervalEstimator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                estimator,
                clock,
                cursor: Mutex::new(Cursor::Unloaded),
                in_flight: AtomicBool::new(false),
                halt: HaltSignal::default(),
            }),
        }
    }

    pub fn video_id(&self) -> &str {
        self.inner.client.video_id()
    }

    pub fn halt_signal(&self) -> HaltSignal {
        self.inner.halt.clone()
    }

    /// Continuation token the next tick will resume from, if loaded.
    pub async fn cursor(&self) -> Option<String> {
        match &*self.inner.cursor.lock().await {
            Cursor::Loaded(token) => token.clone(),
            Cursor::Unloaded => None,
        }
    }

    /// Timer options that drive this loop, first tick immediately.
    pub fn into_timer_options(self) -> TimerOptions {
        TimerOptions::dynamic_end(None, move || {
            let this = self.clone();
            async move { Ok::<_, CallbackError>(this.tick().await) }
        })
    }

    /// Poll, persist, and decide the next delay.
    pub async fn tick(&self) -> TimerControl {
        let inner = &*self.inner;
        let video_id = inner.client.video_id();

        if inner.halt.is_halted() {
            info!(video_id, "Ingestion halted, stopping poll loop");
            return TimerControl::Stop;
        }

        let Some(_in_flight) = InFlight::enter(&inner.in_flight) else {
            warn!(video_id, "Poll already in flight, skipping tick");
            return TimerControl::Reschedule(inner.estimator.config().min_interval);
        };

        let mut cursor = inner.cursor.lock().await;
        let token = match &*cursor {
            Cursor::Loaded(token) => token.clone(),
            Cursor::Unloaded => match inner.store.load_token(video_id).await {
                Ok(token) => {
                    debug!(video_id, resume = token.is_some(), "Loaded continuation cursor");
                    *cursor = Cursor::Loaded(token.clone());
                    token
                }
                Err(e) => {
                    error!(video_id, error = %e, "Failed to load continuation cursor");
                    return TimerControl::Reschedule(inner.estimator.config().max_interval);
                }
            },
        };

        let result = inner.client.fetch(token.as_deref()).await;
        let request_id = result.request_id;

        if let Some(e) = result.error {
            warn!(
                video_id,
                request_id,
                error = %e,
                "Poll failed, next poll restarts from the beginning of the stream"
            );
            *cursor = Cursor::Loaded(None);
            drop(cursor);
            return self.reschedule(false).await;
        }

        let Some(next_token) = result.next_token else {
            error!(
                video_id,
                request_id,
                dropped = result.events.len(),
                "Protocol violation: poll returned no continuation, dropping batch"
            );
            drop(cursor);
            return self.reschedule(false).await;
        };

        let received = result.events.len();
        let had_new_events = match inner.store.persist(video_id, &next_token, result.events).await
        {
            Ok(outcome) => {
                *cursor = Cursor::Loaded(Some(next_token));
                debug!(
                    video_id,
                    request_id,
                    received,
                    inserted = outcome.inserted,
                    duplicates = outcome.duplicates,
                    "Chat batch ingested"
                );
                outcome.inserted > 0
            }
            Err(e) => {
                error!(
                    video_id,
                    request_id,
                    error = %e,
                    "Failed to persist chat batch, cursor not advanced"
                );
                false
            }
        };
        drop(cursor);

        self.reschedule(had_new_events).await
    }

    async fn reschedule(&self, had_new_events: bool) -> TimerControl {
        if self.inner.halt.is_halted() {
            return TimerControl::Stop;
        }
        TimerControl::Reschedule(self.next_delay(had_new_events).await)
    }

    async fn next_delay(&self, had_new_events: bool) -> Duration {
        let inner = &*self.inner;
        let config = inner.estimator.config();
        if had_new_events {
            return config.min_interval;
        }

        let now = inner.clock.now();
        let since = inner.estimator.window_start(now);
        match inner
            .store
            .query_timestamps_since(inner.client.video_id(), since)
            .await
        {
            Ok(timestamps) => inner.estimator.next_interval(timestamps, now, false),
            Err(e) => {
                warn!(
                    video_id = inner.client.video_id(),
                    error = %e,
                    "Failed to read event window, polling at the slowest rate"
                );
                config.max_interval
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::processors::poll_client::test_support::*;
    use crate::store::MemoryEventStore;
    use crate::timer::RepeatingTimer;
    use crate::utils::EstimatorConfig;
    use time::OffsetDateTime;

    const MIN: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_millis(3000);

    fn base() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn setup() -> (Arc<ScriptedTransport>, Arc<MemoryEventStore>, IngestionLoop) {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MemoryEventStore::new());
        let ingestion = IngestionLoop::new(
            PollClient::new(transport.clone(), "v1"),
            store.clone(),
            IntervalEstimator::new(EstimatorConfig::default()),
            Arc::new(MonotonicClock::anchored_at(base())),
        );
        (transport, store, ingestion)
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_events_advance_cursor_and_poll_fast() {
        let (transport, store, ingestion) = setup();
        transport.push(Ok(envelope(&[chat_event("a", base())], Some("t1"))));
        transport.push(Ok(envelope(&[], Some("t2"))));

        assert_eq!(ingestion.tick().await, TimerControl::Reschedule(MIN));
        assert_eq!(ingestion.cursor().await.as_deref(), Some("t1"));
        assert_eq!(store.load_token("v1").await.unwrap().as_deref(), Some("t1"));

        // Nothing new; a single event in the window is below the minimum rate.
        assert_eq!(ingestion.tick().await, TimerControl::Reschedule(MAX));
        assert_eq!(transport.calls(), [None, Some("t1".to_owned())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_from_committed_token() {
        let (transport, store, ingestion) = setup();
        store.persist("v1", "saved", Vec::new()).await.unwrap();
        transport.push(Ok(envelope(&[], Some("t1"))));

        ingestion.tick().await;
        assert_eq!(transport.calls(), [Some("saved".to_owned())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_resets_cursor_only_in_memory() {
        let (transport, store, ingestion) = setup();
        transport.push(Ok(envelope(&[chat_event("a", base())], Some("t1"))));
        transport.push(Err(transport_failure()));
        transport.push(Ok(envelope(&[], Some("fresh"))));

        ingestion.tick().await;
        ingestion.tick().await;
        assert_eq!(ingestion.cursor().await, None);
        assert_eq!(store.load_token("v1").await.unwrap().as_deref(), Some("t1"));

        ingestion.tick().await;
        assert_eq!(
            transport.calls(),
            [None, Some("t1".to_owned()), None]
        );
        assert_eq!(ingestion.cursor().await.as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_continuation_drops_batch() {
        let (transport, store, ingestion) = setup();
        transport.push(Ok(envelope(&[], Some("t1"))));
        transport.push(Ok(envelope(&[chat_event("a", base())], None)));

        ingestion.tick().await;
        assert_eq!(ingestion.tick().await, TimerControl::Reschedule(MAX));
        assert_eq!(store.message_count(), 0);
        assert_eq!(ingestion.cursor().await.as_deref(), Some("t1"));
        assert_eq!(store.load_token("v1").await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_persist_replays_from_previous_token() {
        let (transport, store, ingestion) = setup();
        let batch = [chat_event("a", base()), chat_event("b", base())];
        transport.push(Ok(envelope(&[], Some("t0"))));
        transport.push(Ok(envelope(&batch, Some("t1"))));
        transport.push(Ok(envelope(&batch, Some("t1"))));

        ingestion.tick().await;
        store.fail_after(1);
        ingestion.tick().await;
        assert_eq!(store.message_count(), 0);
        assert_eq!(ingestion.cursor().await.as_deref(), Some("t0"));

        store.clear_failure();
        assert_eq!(ingestion.tick().await, TimerControl::Reschedule(MIN));
        assert_eq!(store.message_count(), 2);
        assert_eq!(
            transport.calls(),
            [None, Some("t0".to_owned()), Some("t0".to_owned())]
        );
        assert_eq!(store.load_token("v1").await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_stops_loop() {
        let (_transport, _store, ingestion) = setup();
        ingestion.halt_signal().halt();
        assert_eq!(ingestion.tick().await, TimerControl::Stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_driven_loop_polls_until_halted() {
        let (transport, store, ingestion) = setup();
        transport.push(Ok(envelope(&[chat_event("a", base())], Some("t1"))));
        transport.push(Ok(envelope(&[chat_event("b", base())], Some("t2"))));
        let halt = ingestion.halt_signal();

        let timer = RepeatingTimer::new();
        let id = timer.create(ingestion.into_timer_options());

        // Fires at 0 and 500 ms (new events both times), then idles.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(store.message_count(), 2);

        halt.halt();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!timer.is_active(id));
    }
}
