//! StreamManager processor.
//!
//! The StreamManager is responsible for:
//! - Starting an ingestion loop and a metadata watcher per configured stream
//! - Reacting to config changes by diffing the running streams (starting or
//!   disposing only the streams that actually changed)
//! - Disposing every timer on shutdown

use crate::clock::Clock;
use crate::config::{ConfigStore, ConfigWatcher, StreamsConfig};
use crate::processors::ingestion::{HaltSignal, IngestionLoop};
use crate::processors::metadata_watcher::{MetadataWatcher, WatchPageSource};
use crate::processors::poll_client::{ChatTransport, PollClient};
use crate::store::{EventStore, LivestreamStore};
use crate::timer::{RepeatingTimer, TimerId};
use crate::utils::IntervalEstimator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Collaborators shared by every stream.
#[derive(Clone)]
pub struct StreamContext {
    pub transport: Arc<dyn ChatTransport>,
    pub pages: Arc<dyn WatchPageSource>,
    pub events: Arc<dyn EventStore>,
    pub livestreams: Arc<dyn LivestreamStore>,
    pub estimator: IntervalEstimator,
    pub clock: Arc<dyn Clock>,
    pub metadata_refresh: Duration,
}

/// Timers belonging to one running stream.
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub video_id: String,
    pub ingestion: TimerId,
    pub metadata: TimerId,
    halt: HaltSignal,
}

pub struct StreamManager {
    context: StreamContext,
    timer: RepeatingTimer,
}

impl StreamManager {
    pub fn new(context: StreamContext) -> Self {
        Self {
            context,
            timer: RepeatingTimer::new(),
        }
    }

    /// Handle on the timer table, for inspection.
    pub fn timer(&self) -> RepeatingTimer {
        self.timer.clone()
    }

    /// Run until shutdown is signaled.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        config_store: ConfigStore<StreamsConfig>,
        mut config_watcher: ConfigWatcher,
    ) {
        let mut active: Vec<ActiveStream> = Vec::new();
        {
            let config = config_store.read().await;
            self.apply_diff(&mut active, &config);
            info!("StreamManager started with {} streams", active.len());
        }

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("StreamManager received shutdown signal");
                        break;
                    }
                }

                Ok(()) = config_watcher.changed() => {
                    let config = config_store.read().await;
                    self.apply_diff(&mut active, &config);
                    info!("StreamManager reconciled config, {} active streams", active.len());
                }

                else => {
                    info!("Config store closed");
                    break;
                }
            }
        }

        for stream in &active {
            stream.halt.halt();
        }
        self.timer.dispose_all();
        info!("StreamManager shutdown complete");
    }

    /// Dispose streams absent from `config` and start the ones not running.
    fn apply_diff(&self, active: &mut Vec<ActiveStream>, config: &StreamsConfig) {
        active.retain(|stream| {
            let keep = config.contains(&stream.video_id);
            if !keep {
                info!(video_id = %stream.video_id, "Stopping removed stream");
                self.stop_stream(stream);
            }
            keep
        });

        for stream in &config.streams {
            if !active.iter().any(|a| a.video_id == stream.video_id) {
                info!(video_id = %stream.video_id, "Starting stream");
                active.push(self.start_stream(&stream.video_id));
            }
        }
    }

    fn start_stream(&self, video_id: &str) -> ActiveStream {
        let ctx = &self.context;
        let ingestion = IngestionLoop::new(
            PollClient::new(ctx.transport.clone(), video_id),
            ctx.events.clone(),
            ctx.estimator,
            ctx.clock.clone(),
        );
        let halt = ingestion.halt_signal();
        let watcher = MetadataWatcher::new(
            video_id,
            ctx.pages.clone(),
            ctx.livestreams.clone(),
            halt.clone(),
        );

        ActiveStream {
            video_id: video_id.to_owned(),
            ingestion: self.timer.create(ingestion.into_timer_options()),
            metadata: self
                .timer
                .create(watcher.into_timer_options(ctx.metadata_refresh)),
            halt,
        }
    }

    fn stop_stream(&self, stream: &ActiveStream) {
        stream.halt.halt();
        self.timer.dispose(stream.ingestion);
        self.timer.dispose(stream.metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::config::StreamConfig;
    use crate::processors::poll_client::test_support::ScriptedTransport;
    use crate::store::MemoryEventStore;
    use crate::utils::EstimatorConfig;
    use async_trait::async_trait;
    use chatmate_sdk::client::ClientError;
    use time::OffsetDateTime;

    struct LivePage;

    #[async_trait]
    impl WatchPageSource for LivePage {
        async fn fetch_watch_page(&self, _video_id: &str) -> Result<String, ClientError> {
            Ok(r#"var ytInitialPlayerResponse = {"videoDetails": {"isLive": true}};"#.to_owned())
        }
    }

    fn streams(ids: &[&str]) -> StreamsConfig {
        StreamsConfig {
            streams: ids.iter().map(|id| StreamConfig::new(*id)).collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciles_streams_and_disposes_on_shutdown() {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MemoryEventStore::new());
        let manager = StreamManager::new(StreamContext {
            transport: transport.clone(),
            pages: Arc::new(LivePage),
            events: store.clone(),
            livestreams: store.clone(),
            estimator: IntervalEstimator::new(EstimatorConfig::default()),
            clock: Arc::new(MonotonicClock::anchored_at(
                OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            )),
            metadata_refresh: Duration::from_secs(15),
        });
        let timer = manager.timer();

        let config_store = ConfigStore::new(streams(&["v1"]));
        let watcher = config_store.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(manager.run(shutdown_rx, config_store.clone(), watcher));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timer.active_count(), 2);
        assert!(store.metadata("v1").is_some());

        config_store.update(streams(&["v2", "v3"])).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timer.active_count(), 4);
        assert!(store.metadata("v3").is_some());

        config_store.update(streams(&["v3"])).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timer.active_count(), 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(timer.active_count(), 0);
        assert!(!transport.calls().is_empty());
    }
}
