use super::{EventStore, LivestreamStore, PersistOutcome, StoreError, sort_batch};
use crate::entities::chat_cursor::{CommitChatCursor, GetChatCursor};
use crate::entities::chat_message::{
    GetChatMessageTimestampsSince, GetChatMessagesSince, InsertChatMessage,
};
use crate::entities::livestream::UpsertLivestreamMetadata;
use crate::framework::{DatabaseProcessor, TransactionProcessor};
use async_trait::async_trait;
use chatmate_sdk::objects::{ChatEvent, StreamMetadata};
use kanau::processor::Processor;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::debug;

/// Postgres-backed store. Each batch runs in its own transaction.
pub struct PgEventStore {
    db: DatabaseProcessor,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db.pool
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn persist(
        &self,
        video_id: &str,
        token: &str,
        mut events: Vec<ChatEvent>,
    ) -> Result<PersistOutcome, StoreError> {
        sort_batch(&mut events);
        let mut outcome = PersistOutcome::default();

        // Dropping the transaction on any early return rolls it back.
        let mut tx = TransactionProcessor::begin(&self.db.pool).await?;
        for event in events {
            let created = InsertChatMessage {
                video_id: video_id.to_owned(),
                event,
            }
            .execute(&mut tx)
            .await?;
            if created {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        CommitChatCursor {
            video_id: video_id.to_owned(),
            token: token.to_owned(),
        }
        .execute(&mut tx)
        .await?;
        tx.commit().await?;

        debug!(
            video_id,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "Persisted chat batch"
        );
        Ok(outcome)
    }

    async fn load_token(&self, video_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .db
            .process(GetChatCursor {
                video_id: video_id.to_owned(),
            })
            .await?)
    }

    async fn query_events_since(
        &self,
        video_id: &str,
        since: OffsetDateTime,
        limit: Option<i64>,
    ) -> Result<Vec<ChatEvent>, StoreError> {
        Ok(self
            .db
            .process(GetChatMessagesSince {
                video_id: video_id.to_owned(),
                since,
                limit,
            })
            .await?)
    }

    async fn query_timestamps_since(
        &self,
        video_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<OffsetDateTime>, StoreError> {
        Ok(self
            .db
            .process(GetChatMessageTimestampsSince {
                video_id: video_id.to_owned(),
                since,
            })
            .await?)
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl LivestreamStore for PgEventStore {
    async fn record_metadata(
        &self,
        video_id: &str,
        metadata: &StreamMetadata,
    ) -> Result<(), StoreError> {
        self.db
            .process(UpsertLivestreamMetadata {
                video_id: video_id.to_owned(),
                metadata: metadata.clone(),
            })
            .await?;
        Ok(())
    }
}
