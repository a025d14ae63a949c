//! MetadataWatcher processor.
//!
//! Periodically scrapes the watch page of a stream, records what it finds,
//! and halts the stream's ingestion once the broadcast is over or the page
//! reports a fatal classification.

use crate::processors::ingestion::HaltSignal;
use crate::scrape::{ScrapeError, parse_metadata};
use crate::store::LivestreamStore;
use crate::timer::{CallbackError, TimerControl, TimerOptions};
use async_trait::async_trait;
use chatmate_sdk::client::{ClientError, LiveChatClient};
use chatmate_sdk::objects::{LiveStatus, StreamMetadata};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait WatchPageSource: Send + Sync {
    async fn fetch_watch_page(&self, video_id: &str) -> Result<String, ClientError>;
}

#[async_trait]
impl WatchPageSource for LiveChatClient {
    async fn fetch_watch_page(&self, video_id: &str) -> Result<String, ClientError> {
        LiveChatClient::fetch_watch_page(self, video_id).await
    }
}

#[derive(Clone)]
pub struct MetadataWatcher {
    inner: Arc<Inner>,
}

struct Inner {
    video_id: String,
    source: Arc<dyn WatchPageSource>,
    store: Arc<dyn LivestreamStore>,
    halt: HaltSignal,
    latest: Mutex<Option<StreamMetadata>>,
}

impl MetadataWatcher {
    pub fn new(
        video_id: impl Into<String>,
        source: Arc<dyn WatchPageSource>,
        store: Arc<dyn LivestreamStore>,
        halt: HaltSignal,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                video_id: video_id.into(),
                source,
                store,
                halt,
                latest: Mutex::new(None),
            }),
        }
    }

    /// Last successfully scraped metadata.
    pub fn latest(&self) -> Option<StreamMetadata> {
        self.inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Scrape once. Transient failures yield `Ok(None)`; fatal
    /// classifications halt ingestion and are returned.
    pub async fn refresh(&self) -> Result<Option<StreamMetadata>, ScrapeError> {
        let inner = &*self.inner;
        let video_id = inner.video_id.as_str();

        let document = match inner.source.fetch_watch_page(video_id).await {
            Ok(document) => document,
            Err(e) => {
                warn!(video_id, error = %e, "Failed to fetch watch page");
                return Ok(None);
            }
        };

        let metadata = match parse_metadata(&document) {
            Ok(metadata) => metadata,
            Err(e) if e.is_fatal() => {
                error!(video_id, error = %e, "Stream cannot be ingested, halting");
                inner.halt.halt();
                return Err(e);
            }
            Err(e) => {
                warn!(video_id, error = %e, "Failed to parse watch page");
                return Ok(None);
            }
        };

        debug!(
            video_id,
            status = ?metadata.status,
            viewers = ?metadata.viewer_count,
            "Refreshed stream metadata"
        );

        if let Err(e) = inner.store.record_metadata(video_id, &metadata).await {
            warn!(video_id, error = %e, "Failed to record stream metadata");
        }

        if metadata.status == Some(LiveStatus::Finished) {
            info!(video_id, "Stream finished, halting ingestion");
            inner.halt.halt();
        }

        *inner.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(metadata.clone());
        Ok(Some(metadata))
    }

    /// Timer options refreshing every `interval`, first refresh immediately.
    pub fn into_timer_options(self, interval: Duration) -> TimerOptions {
        TimerOptions::dynamic_end(None, move || {
            let this = self.clone();
            async move { this.fire(interval).await.map_err(CallbackError::from) }
        })
    }

    async fn fire(&self, interval: Duration) -> Result<TimerControl, ScrapeError> {
        if self.inner.halt.is_halted() {
            return Ok(TimerControl::Stop);
        }
        self.refresh().await?;
        if self.inner.halt.is_halted() {
            Ok(TimerControl::Stop)
        } else {
            Ok(TimerControl::Reschedule(interval))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEventStore;
    use crate::timer::RepeatingTimer;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedPages {
        pages: Mutex<VecDeque<Result<String, ClientError>>>,
    }

    impl ScriptedPages {
        fn push_player(&self, player: serde_json::Value) {
            let html = format!("<script>var ytInitialPlayerResponse = {player};</script>");
            self.pages.lock().unwrap().push_back(Ok(html));
        }
    }

    #[async_trait]
    impl WatchPageSource for ScriptedPages {
        async fn fetch_watch_page(&self, _video_id: &str) -> Result<String, ClientError> {
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::MissingEmbeddedData("ytInitialPlayerResponse")))
        }
    }

    fn setup() -> (Arc<ScriptedPages>, Arc<MemoryEventStore>, HaltSignal, MetadataWatcher) {
        let pages = Arc::new(ScriptedPages::default());
        let store = Arc::new(MemoryEventStore::new());
        let halt = HaltSignal::default();
        let watcher = MetadataWatcher::new("v1", pages.clone(), store.clone(), halt.clone());
        (pages, store, halt, watcher)
    }

    #[tokio::test]
    async fn test_live_stream_is_recorded() {
        let (pages, store, halt, watcher) = setup();
        pages.push_player(json!({"videoDetails": {"title": "Live now", "isLive": true}}));

        let metadata = watcher.refresh().await.unwrap().unwrap();
        assert_eq!(metadata.status, Some(LiveStatus::Live));
        assert_eq!(store.metadata("v1"), Some(metadata.clone()));
        assert_eq!(watcher.latest(), Some(metadata));
        assert!(!halt.is_halted());
    }

    #[tokio::test]
    async fn test_transient_failures_keep_running() {
        let (pages, _store, halt, watcher) = setup();
        pages.pages.lock().unwrap().push_back(Ok("<html></html>".to_owned()));

        assert_eq!(watcher.refresh().await.unwrap(), None);
        assert_eq!(watcher.refresh().await.unwrap(), None);
        assert!(!halt.is_halted());
    }

    #[tokio::test]
    async fn test_fatal_classification_halts() {
        let (pages, _store, halt, watcher) = setup();
        pages.push_player(json!({"playabilityStatus": {"status": "LOGIN_REQUIRED"}}));

        assert_eq!(watcher.refresh().await, Err(ScrapeError::LoginRequired));
        assert!(halt.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_stops_when_stream_finishes() {
        let (pages, _store, halt, watcher) = setup();
        pages.push_player(json!({"videoDetails": {"isLive": true}}));
        pages.push_player(json!({"videoDetails": {"isLiveContent": true, "isLive": false}}));

        let timer = RepeatingTimer::new();
        let id = timer.create(watcher.into_timer_options(Duration::from_secs(15)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(timer.is_active(id));
        assert!(!halt.is_halted());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(halt.is_halted());
        assert!(!timer.is_active(id));
    }
}
