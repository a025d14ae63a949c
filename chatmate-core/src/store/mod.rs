//! Idempotent event persistence.
//!
//! An [`EventStore`] writes a polled batch and the continuation token that
//! produced it as one unit: events are upserted by `external_id` in
//! ascending timestamp order, and the token is written last. If any write
//! fails nothing is committed, and replaying the batch later is harmless.

mod memory;
mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

use async_trait::async_trait;
use chatmate_sdk::objects::{ChatEvent, StreamMetadata};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure reported by a non-database backend.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Counts for one persisted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Events whose `external_id` was not stored before.
    pub inserted: usize,
    /// Events that were already known (or repeated within the batch).
    pub duplicates: usize,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist `events` of `video_id` and then commit `token` as its cursor.
    async fn persist(
        &self,
        video_id: &str,
        token: &str,
        events: Vec<ChatEvent>,
    ) -> Result<PersistOutcome, StoreError>;

    /// The last committed continuation token of `video_id`.
    async fn load_token(&self, video_id: &str) -> Result<Option<String>, StoreError>;

    /// Events of `video_id` sent at or after `since`, oldest first.
    async fn query_events_since(
        &self,
        video_id: &str,
        since: OffsetDateTime,
        limit: Option<i64>,
    ) -> Result<Vec<ChatEvent>, StoreError>;

    /// Send times only, for the poll-interval window.
    async fn query_timestamps_since(
        &self,
        video_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<OffsetDateTime>, StoreError> {
        Ok(self
            .query_events_since(video_id, since, None)
            .await?
            .into_iter()
            .map(|e| e.timestamp)
            .collect())
    }

    /// Short backend name, reported by the health endpoint.
    fn kind(&self) -> &'static str;
}

#[async_trait]
pub trait LivestreamStore: Send + Sync {
    async fn record_metadata(
        &self,
        video_id: &str,
        metadata: &StreamMetadata,
    ) -> Result<(), StoreError>;
}

/// Stable ascending timestamp order, as required before writing a batch.
pub(crate) fn sort_batch(events: &mut [ChatEvent]) {
    events.sort_by_key(|e| e.timestamp);
}
