//! Chat events as they flow from the poll transport into the store.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use time::OffsetDateTime;

/// Most chat messages carry one or two runs; longer ones spill to the heap.
pub type MessageParts = SmallVec<[MessagePart; 4]>;

/// A single chat message.
///
/// `external_id` is the natural key assigned upstream. Once persisted an
/// event is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub external_id: String,
    pub timestamp: OffsetDateTime,
    pub author: ChatAuthor,
    pub parts: MessageParts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAuthor {
    /// Upstream channel id of the author.
    pub channel_id: String,
    /// Display name at the time the message was sent.
    pub name: String,
}

/// One ordered fragment of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Emoji {
        emoji_id: String,
        /// The first shortcut (e.g. `:wave:`), if upstream provided any.
        label: Option<String>,
        image_url: Option<String>,
    },
}

impl MessagePart {
    /// Plain-text rendering, with emoji replaced by their label.
    pub fn as_text(&self) -> &str {
        match self {
            MessagePart::Text { text } => text,
            MessagePart::Emoji { label, emoji_id, .. } => label.as_deref().unwrap_or(emoji_id),
        }
    }
}

impl ChatEvent {
    /// Concatenated plain-text body.
    pub fn text(&self) -> String {
        self.parts.iter().map(MessagePart::as_text).collect()
    }
}
