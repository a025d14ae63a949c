pub mod chat_cursor;
pub mod chat_message;
pub mod livestream;
pub mod sanction;

use chatmate_sdk::objects::LiveStatus as SdkLiveStatus;

/// Live status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `chatmate_sdk::objects::LiveStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "live_status")]
pub enum LiveStatusName {
    NotStarted,
    Live,
    Finished,
}

impl From<LiveStatusName> for SdkLiveStatus {
    fn from(value: LiveStatusName) -> Self {
        match value {
            LiveStatusName::NotStarted => SdkLiveStatus::NotStarted,
            LiveStatusName::Live => SdkLiveStatus::Live,
            LiveStatusName::Finished => SdkLiveStatus::Finished,
        }
    }
}

impl From<SdkLiveStatus> for LiveStatusName {
    fn from(value: SdkLiveStatus) -> Self {
        match value {
            SdkLiveStatus::NotStarted => LiveStatusName::NotStarted,
            SdkLiveStatus::Live => LiveStatusName::Live,
            SdkLiveStatus::Finished => LiveStatusName::Finished,
        }
    }
}

/// Kind of a stored message part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "message_part_kind")]
pub enum MessagePartKind {
    Text,
    Emoji,
}
