pub mod chat;
pub mod embedded;
pub mod envelope;
pub mod metadata;

pub use chat::{ChatAuthor, ChatEvent, MessagePart, MessageParts};
pub use envelope::{
    Action, Continuation, ErrorInfo, InitialLiveChatData, LiveChatResponse, PollEnvelope,
};
pub use metadata::{LiveStatus, StreamMetadata};
