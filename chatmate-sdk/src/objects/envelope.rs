//! The normalized poll envelope and the upstream response it is decoded from.
//!
//! Upstream answers a poll with a deeply nested document. [`LiveChatResponse`]
//! mirrors only the parts we read; everything else is ignored. The chat page
//! that starts a session embeds the same chat object under a different path,
//! read through [`InitialLiveChatData`]. Decoding is tolerant: an individual
//! chat item that cannot be understood is skipped rather than failing the
//! whole batch.

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize};
use smallvec::SmallVec;
use time::OffsetDateTime;

use super::chat::{ChatAuthor, ChatEvent, MessagePart, MessageParts};

/// `{ actions, continuation: { token, timeoutMs } | null, error }`
///
/// `continuation == None` together with `error == None` is a protocol
/// violation and must be handled by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollEnvelope {
    #[serde(default)]
    pub actions: Vec<Action>,
    pub continuation: Option<Continuation>,
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continuation {
    pub token: String,
    /// How long until this continuation naturally expires. Advisory only.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: i64,
    pub message: String,
    pub status: Option<String>,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            Some(status) => write!(f, "{} {}: {}", self.code, status, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    AddChatItem { event: ChatEvent },
    /// A moderator removed a message. Carried for completeness; ingestion
    /// never deletes persisted events.
    RemoveChatItem { target_id: String },
}

// ---------------------------------------------------------------------------
// Upstream document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatResponse {
    #[serde(default)]
    pub continuation_contents: Option<ContinuationContents>,
    #[serde(default)]
    pub error: Option<UpstreamError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationContents {
    pub live_chat_continuation: LiveChatContinuation,
}

/// `ytInitialData` of the chat page: the first batch and continuation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialLiveChatData {
    #[serde(default)]
    pub contents: Option<InitialContents>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialContents {
    pub live_chat_renderer: LiveChatContinuation,
}

/// A value that decodes to `None` instead of failing when it does not fit `T`.
#[derive(Debug, Clone, Default)]
pub struct Lenient<T>(pub Option<T>);

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Lenient(T::deserialize(value).ok()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatContinuation {
    #[serde(default)]
    pub continuations: Vec<ContinuationData>,
    #[serde(default)]
    pub actions: Vec<Lenient<RawAction>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationData {
    pub invalidation_continuation_data: Option<TimedContinuation>,
    pub timed_continuation_data: Option<TimedContinuation>,
    pub reload_continuation_data: Option<TimedContinuation>,
}

impl ContinuationData {
    fn into_continuation(self) -> Option<Continuation> {
        let data = self
            .invalidation_continuation_data
            .or(self.timed_continuation_data)
            .or(self.reload_continuation_data)?;
        Some(Continuation {
            token: data.continuation,
            timeout_ms: data.timeout_ms,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedContinuation {
    pub continuation: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    pub add_chat_item_action: Option<AddChatItemAction>,
    pub mark_chat_item_as_deleted_action: Option<MarkDeletedAction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChatItemAction {
    pub item: RawChatItem,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkDeletedAction {
    pub target_item_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChatItem {
    pub live_chat_text_message_renderer: Option<TextMessageRenderer>,
    pub live_chat_paid_message_renderer: Option<TextMessageRenderer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageRenderer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp_usec: String,
    #[serde(default)]
    pub author_name: Option<SimpleText>,
    #[serde(default)]
    pub author_external_channel_id: String,
    #[serde(default)]
    pub message: Option<Runs>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleText {
    pub simple_text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Runs {
    #[serde(default)]
    pub runs: Vec<Run>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Run {
    Text { text: String },
    Emoji { emoji: RawEmoji },
    /// Any other run shape; dropped from the message.
    Unknown(IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEmoji {
    pub emoji_id: String,
    #[serde(default)]
    pub shortcuts: Vec<String>,
    #[serde(default)]
    pub image: Option<RawImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawImage {
    #[serde(default)]
    pub thumbnails: Vec<RawThumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawThumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl From<UpstreamError> for ErrorInfo {
    fn from(e: UpstreamError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            status: e.status,
        }
    }
}

impl From<LiveChatResponse> for PollEnvelope {
    fn from(response: LiveChatResponse) -> Self {
        let error = response.error.map(ErrorInfo::from);
        match response.continuation_contents {
            Some(contents) => contents.live_chat_continuation.into_envelope(error),
            None => PollEnvelope {
                actions: Vec::new(),
                continuation: None,
                error,
            },
        }
    }
}

impl From<InitialLiveChatData> for PollEnvelope {
    fn from(data: InitialLiveChatData) -> Self {
        data.contents
            .map(|c| c.live_chat_renderer.into_envelope(None))
            .unwrap_or_default()
    }
}

impl LiveChatContinuation {
    fn into_envelope(self, error: Option<ErrorInfo>) -> PollEnvelope {
        let continuation = self
            .continuations
            .into_iter()
            .find_map(ContinuationData::into_continuation);
        let actions = self
            .actions
            .into_iter()
            .filter_map(|action| action.0)
            .filter_map(RawAction::into_action)
            .collect();

        PollEnvelope {
            actions,
            continuation,
            error,
        }
    }
}

impl RawAction {
    fn into_action(self) -> Option<Action> {
        if let Some(deleted) = self.mark_chat_item_as_deleted_action {
            return Some(Action::RemoveChatItem {
                target_id: deleted.target_item_id,
            });
        }
        let item = self.add_chat_item_action?.item;
        let renderer = item
            .live_chat_text_message_renderer
            .or(item.live_chat_paid_message_renderer)?;
        renderer.into_event().map(|event| Action::AddChatItem { event })
    }
}

impl TextMessageRenderer {
    fn into_event(self) -> Option<ChatEvent> {
        if self.id.is_empty() {
            return None;
        }
        let usec: i128 = self.timestamp_usec.parse().ok()?;
        let timestamp = OffsetDateTime::from_unix_timestamp_nanos(usec.checked_mul(1_000)?).ok()?;
        let parts: MessageParts = self
            .message
            .map(|m| m.runs.into_iter().filter_map(Run::into_part).collect())
            .unwrap_or_else(SmallVec::new);

        Some(ChatEvent {
            external_id: self.id,
            timestamp,
            author: ChatAuthor {
                channel_id: self.author_external_channel_id,
                name: self.author_name.map(|n| n.simple_text).unwrap_or_default(),
            },
            parts,
        })
    }
}

impl Run {
    fn into_part(self) -> Option<MessagePart> {
        match self {
            Run::Text { text } => Some(MessagePart::Text { text }),
            Run::Emoji { emoji } => Some(MessagePart::Emoji {
                label: emoji.shortcuts.into_iter().next(),
                image_url: emoji
                    .image
                    .and_then(|i| i.thumbnails.into_iter().last())
                    .map(|t| t.url),
                emoji_id: emoji.emoji_id,
            }),
            Run::Unknown(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(value: serde_json::Value) -> PollEnvelope {
        let response: LiveChatResponse = serde_json::from_value(value).unwrap();
        response.into()
    }

    #[test]
    fn test_decode_text_and_emoji_runs() {
        let envelope = decode(serde_json::json!({
            "continuationContents": {
                "liveChatContinuation": {
                    "continuations": [
                        { "invalidationContinuationData": { "continuation": "tok-2", "timeoutMs": 10000 } }
                    ],
                    "actions": [
                        {
                            "addChatItemAction": {
                                "item": {
                                    "liveChatTextMessageRenderer": {
                                        "id": "msg-1",
                                        "timestampUsec": "1700000000123456",
                                        "authorName": { "simpleText": "viewer" },
                                        "authorExternalChannelId": "UC123",
                                        "message": {
                                            "runs": [
                                                { "text": "hello " },
                                                {
                                                    "emoji": {
                                                        "emojiId": "\u{1F44B}",
                                                        "shortcuts": [":wave:"],
                                                        "image": { "thumbnails": [{ "url": "https://e/1" }, { "url": "https://e/2" }] }
                                                    }
                                                }
                                            ]
                                        }
                                    }
                                }
                            }
                        },
                        { "addBannerToLiveChatCommand": {} }
                    ]
                }
            }
        }));

        assert_eq!(
            envelope.continuation,
            Some(Continuation {
                token: "tok-2".to_string(),
                timeout_ms: Some(10000)
            })
        );
        assert!(envelope.error.is_none());
        assert_eq!(envelope.actions.len(), 1);
        let Action::AddChatItem { event } = &envelope.actions[0] else {
            panic!("expected a chat item");
        };
        assert_eq!(event.external_id, "msg-1");
        assert_eq!(event.author.channel_id, "UC123");
        assert_eq!(event.timestamp.unix_timestamp(), 1_700_000_000);
        assert_eq!(event.text(), "hello :wave:");
        assert_eq!(
            event.parts[1],
            MessagePart::Emoji {
                emoji_id: "\u{1F44B}".to_string(),
                label: Some(":wave:".to_string()),
                image_url: Some("https://e/2".to_string()),
            }
        );
    }

    #[test]
    fn test_item_with_bad_timestamp_is_skipped() {
        let envelope = decode(serde_json::json!({
            "continuationContents": {
                "liveChatContinuation": {
                    "continuations": [{ "timedContinuationData": { "continuation": "tok" } }],
                    "actions": [{
                        "addChatItemAction": { "item": { "liveChatTextMessageRenderer": {
                            "id": "bad", "timestampUsec": "soon", "authorExternalChannelId": "UC1"
                        }}}
                    }]
                }
            }
        }));
        assert!(envelope.actions.is_empty());
        assert_eq!(envelope.continuation.map(|c| c.token).as_deref(), Some("tok"));
    }

    #[test]
    fn test_missing_contents_yields_no_continuation() {
        let envelope = decode(serde_json::json!({
            "error": { "code": 403, "message": "forbidden", "status": "PERMISSION_DENIED" }
        }));
        assert!(envelope.continuation.is_none());
        let error = envelope.error.unwrap();
        assert_eq!(error.code, 403);
        assert_eq!(error.to_string(), "403 PERMISSION_DENIED: forbidden");

        let envelope = decode(serde_json::json!({ "responseContext": {} }));
        assert!(envelope.continuation.is_none());
        assert!(envelope.error.is_none());
    }

    fn text_item(id: &str, timestamp_usec: &str, runs: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "addChatItemAction": { "item": { "liveChatTextMessageRenderer": {
                "id": id,
                "timestampUsec": timestamp_usec,
                "authorExternalChannelId": "UC1",
                "message": { "runs": runs }
            }}}
        })
    }

    #[test]
    fn test_chat_page_data_yields_first_batch_and_token() {
        let data: InitialLiveChatData = serde_json::from_value(serde_json::json!({
            "responseContext": {},
            "contents": { "liveChatRenderer": {
                "continuations": [
                    { "invalidationContinuationData": { "continuation": "tok-0", "timeoutMs": 5000 } }
                ],
                "actions": [text_item("msg-1", "1700000000000000", serde_json::json!([{ "text": "first" }]))]
            }}
        }))
        .unwrap();
        let envelope = PollEnvelope::from(data);

        assert_eq!(
            envelope.continuation,
            Some(Continuation {
                token: "tok-0".to_string(),
                timeout_ms: Some(5000)
            })
        );
        assert!(envelope.error.is_none());
        assert_eq!(envelope.actions.len(), 1);

        let empty: InitialLiveChatData = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(PollEnvelope::from(empty), PollEnvelope::default());
    }

    #[test]
    fn test_oversized_timestamp_is_skipped() {
        let envelope = decode(serde_json::json!({
            "continuationContents": { "liveChatContinuation": {
                "continuations": [{ "timedContinuationData": { "continuation": "t" } }],
                "actions": [
                    text_item("huge", "170141183460469231731687303715884105727", serde_json::json!([{ "text": "x" }])),
                    text_item("ok", "1700000000000000", serde_json::json!([{ "text": "y" }]))
                ]
            }}
        }));
        assert_eq!(envelope.actions.len(), 1);
        let Action::AddChatItem { event } = &envelope.actions[0] else {
            panic!("expected a chat item");
        };
        assert_eq!(event.external_id, "ok");
    }

    #[test]
    fn test_unknown_run_and_malformed_action_keep_the_batch() {
        let envelope = decode(serde_json::json!({
            "continuationContents": { "liveChatContinuation": {
                "continuations": [{ "timedContinuationData": { "continuation": "t" } }],
                "actions": [
                    text_item("good", "1700000000000000", serde_json::json!([{ "text": "hi" }])),
                    text_item("odd", "1700000001000000", serde_json::json!([
                        { "text": "see " },
                        { "emoji": { "shortcuts": [":x:"] } }
                    ])),
                    { "addChatItemAction": { "item": 7 } }
                ]
            }}
        }));

        assert_eq!(envelope.continuation.map(|c| c.token).as_deref(), Some("t"));
        let ids: Vec<_> = envelope
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::AddChatItem { event } => Some((event.external_id.as_str(), event.text())),
                Action::RemoveChatItem { .. } => None,
            })
            .collect();
        assert_eq!(
            ids,
            vec![("good", "hi".to_string()), ("odd", "see ".to_string())]
        );
    }

    #[test]
    fn test_deleted_item_action() {
        let envelope = decode(serde_json::json!({
            "continuationContents": { "liveChatContinuation": {
                "continuations": [{ "timedContinuationData": { "continuation": "t" } }],
                "actions": [{ "markChatItemAsDeletedAction": { "targetItemId": "msg-9" } }]
            }}
        }));
        assert_eq!(
            envelope.actions,
            vec![Action::RemoveChatItem {
                target_id: "msg-9".to_string()
            }]
        );
    }
}
