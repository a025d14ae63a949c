use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SanctionRecord {
    pub id: i64,
    pub live_chat_id: String,
    pub channel_id: String,
    pub expires_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
/// Sanctions that are neither revoked nor expired at `now`.
pub struct GetActiveSanctions {
    pub now: OffsetDateTime,
}

impl Processor<GetActiveSanctions> for DatabaseProcessor {
    type Output = Vec<SanctionRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActiveSanctions")]
    async fn process(&self, query: GetActiveSanctions) -> Result<Vec<SanctionRecord>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT id, live_chat_id, channel_id, expires_at, revoked_at
            FROM sanctions
            WHERE revoked_at IS NULL AND expires_at > $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(query.now)
        .fetch_all(&self.pool)
        .await
    }
}
