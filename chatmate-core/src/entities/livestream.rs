use crate::entities::LiveStatusName;
use crate::framework::DatabaseProcessor;
use chatmate_sdk::objects::StreamMetadata;
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Record the latest scraped metadata of a stream.
///
/// Unknown fields keep their previously stored value.
pub struct UpsertLivestreamMetadata {
    pub video_id: String,
    pub metadata: StreamMetadata,
}

impl Processor<UpsertLivestreamMetadata> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertLivestreamMetadata")]
    async fn process(&self, upsert: UpsertLivestreamMetadata) -> Result<(), sqlx::Error> {
        let UpsertLivestreamMetadata { video_id, metadata } = upsert;
        sqlx::query(
            r#"
            INSERT INTO livestreams (video_id, title, channel_name, channel_id, status, viewer_count, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (video_id) DO UPDATE SET
                title = COALESCE(EXCLUDED.title, livestreams.title),
                channel_name = COALESCE(EXCLUDED.channel_name, livestreams.channel_name),
                channel_id = COALESCE(EXCLUDED.channel_id, livestreams.channel_id),
                status = COALESCE(EXCLUDED.status, livestreams.status),
                viewer_count = EXCLUDED.viewer_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&video_id)
        .bind(metadata.title)
        .bind(metadata.channel_name)
        .bind(metadata.channel_id)
        .bind(metadata.status.map(LiveStatusName::from))
        .bind(metadata.viewer_count.map(|v| v.min(i64::MAX as u64) as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
