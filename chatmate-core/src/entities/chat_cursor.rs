use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use kanau::processor::Processor;

#[derive(Debug, Clone)]
/// Store the continuation token for a stream, replacing any previous one.
pub struct CommitChatCursor {
    pub video_id: String,
    pub token: String,
}

impl CommitChatCursor {
    #[tracing::instrument(skip_all, err, name = "SQL:CommitChatCursor")]
    pub async fn execute(self, db: &mut impl DatabaseAccessor) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO chat_cursors (video_id, continuation_token, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (video_id)
            DO UPDATE SET continuation_token = EXCLUDED.continuation_token,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&self.video_id)
        .bind(&self.token)
        .execute(db.acquire())
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// The last committed continuation token of a stream, if any.
pub struct GetChatCursor {
    pub video_id: String,
}

impl Processor<GetChatCursor> for DatabaseProcessor {
    type Output = Option<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetChatCursor")]
    async fn process(&self, query: GetChatCursor) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT continuation_token FROM chat_cursors WHERE video_id = $1")
            .bind(&query.video_id)
            .fetch_optional(&self.pool)
            .await
    }
}
