use crate::entities::MessagePartKind;
use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use chatmate_sdk::objects::{ChatAuthor, ChatEvent, MessagePart, MessageParts};
use kanau::processor::Processor;
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessageRow {
    pub id: i64,
    pub external_id: String,
    pub video_id: String,
    pub author_channel_id: String,
    pub author_name: String,
    pub sent_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessagePartRow {
    pub message_id: i64,
    pub part_index: i32,
    pub kind: MessagePartKind,
    pub text: Option<String>,
    pub emoji_id: Option<String>,
    pub label: Option<String>,
    pub image_url: Option<String>,
}

impl ChatMessagePartRow {
    fn into_part(self) -> Option<MessagePart> {
        match self.kind {
            MessagePartKind::Text => Some(MessagePart::Text { text: self.text? }),
            MessagePartKind::Emoji => Some(MessagePart::Emoji {
                emoji_id: self.emoji_id?,
                label: self.label,
                image_url: self.image_url,
            }),
        }
    }
}

#[derive(Debug, Clone)]
/// Insert one chat message and any of its parts not yet stored.
///
/// The header is keyed by `external_id`; a known id leaves the header as is.
/// Parts are keyed by `(message_id, part_index)`, so a retry after a
/// partial write only fills the gaps. Returns `true` if the header is new.
pub struct InsertChatMessage {
    pub video_id: String,
    pub event: ChatEvent,
}

impl InsertChatMessage {
    #[tracing::instrument(skip_all, err, name = "SQL:InsertChatMessage")]
    pub async fn execute(self, db: &mut impl DatabaseAccessor) -> Result<bool, sqlx::Error> {
        let InsertChatMessage { video_id, event } = self;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO chat_messages (external_id, video_id, author_channel_id, author_name, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event.external_id)
        .bind(&video_id)
        .bind(&event.author.channel_id)
        .bind(&event.author.name)
        .bind(event.timestamp)
        .fetch_optional(db.acquire())
        .await?;

        let (message_id, created) = match inserted {
            Some(id) => (id, true),
            None => {
                let id: i64 =
                    sqlx::query_scalar("SELECT id FROM chat_messages WHERE external_id = $1")
                        .bind(&event.external_id)
                        .fetch_one(db.acquire())
                        .await?;
                (id, false)
            }
        };

        if event.parts.is_empty() {
            return Ok(created);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO chat_message_parts \
            (message_id, part_index, kind, text, emoji_id, label, image_url) ",
        );

        query_builder.push_values(
            event.parts.into_iter().enumerate(),
            |mut b, (index, part)| {
                b.push_bind(message_id).push_bind(index as i32);
                match part {
                    MessagePart::Text { text } => {
                        b.push_bind(MessagePartKind::Text)
                            .push_bind(Some(text))
                            .push_bind(None::<String>)
                            .push_bind(None::<String>)
                            .push_bind(None::<String>);
                    }
                    MessagePart::Emoji {
                        emoji_id,
                        label,
                        image_url,
                    } => {
                        b.push_bind(MessagePartKind::Emoji)
                            .push_bind(None::<String>)
                            .push_bind(Some(emoji_id))
                            .push_bind(label)
                            .push_bind(image_url);
                    }
                }
            },
        );

        query_builder.push(" ON CONFLICT (message_id, part_index) DO NOTHING");
        query_builder.build().execute(db.acquire()).await?;

        Ok(created)
    }
}

#[derive(Debug, Clone)]
/// Messages of one stream sent at or after `since`, oldest first.
pub struct GetChatMessagesSince {
    pub video_id: String,
    pub since: OffsetDateTime,
    pub limit: Option<i64>,
}

impl Processor<GetChatMessagesSince> for DatabaseProcessor {
    type Output = Vec<ChatEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetChatMessagesSince")]
    async fn process(&self, query: GetChatMessagesSince) -> Result<Vec<ChatEvent>, sqlx::Error> {
        let GetChatMessagesSince {
            video_id,
            since,
            limit,
        } = query;

        let headers: Vec<ChatMessageRow> = sqlx::query_as(
            r#"
            SELECT id, external_id, video_id, author_channel_id, author_name, sent_at
            FROM chat_messages
            WHERE video_id = $1 AND sent_at >= $2
            ORDER BY sent_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(&video_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if headers.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = headers.iter().map(|h| h.id).collect();
        let part_rows: Vec<ChatMessagePartRow> = sqlx::query_as(
            r#"
            SELECT message_id, part_index, kind, text, emoji_id, label, image_url
            FROM chat_message_parts
            WHERE message_id = ANY($1)
            ORDER BY message_id ASC, part_index ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut parts: HashMap<i64, MessageParts> = HashMap::with_capacity(headers.len());
        for row in part_rows {
            let message_id = row.message_id;
            if let Some(part) = row.into_part() {
                parts.entry(message_id).or_default().push(part);
            }
        }

        Ok(headers
            .into_iter()
            .map(|h| ChatEvent {
                parts: parts.remove(&h.id).unwrap_or_default(),
                external_id: h.external_id,
                timestamp: h.sent_at,
                author: ChatAuthor {
                    channel_id: h.author_channel_id,
                    name: h.author_name,
                },
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
/// Send times of one stream's messages inside `[since, ∞)`.
///
/// Cheaper than [`GetChatMessagesSince`] when only the estimator window is
/// needed.
pub struct GetChatMessageTimestampsSince {
    pub video_id: String,
    pub since: OffsetDateTime,
}

impl Processor<GetChatMessageTimestampsSince> for DatabaseProcessor {
    type Output = Vec<OffsetDateTime>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetChatMessageTimestampsSince")]
    async fn process(
        &self,
        query: GetChatMessageTimestampsSince,
    ) -> Result<Vec<OffsetDateTime>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT sent_at
            FROM chat_messages
            WHERE video_id = $1 AND sent_at >= $2
            ORDER BY sent_at ASC
            "#,
        )
        .bind(&query.video_id)
        .bind(query.since)
        .fetch_all(&self.pool)
        .await
    }
}
