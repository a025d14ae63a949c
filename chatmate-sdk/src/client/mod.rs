//! HTTP transports for the upstream chat service.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest`.

mod live_chat;
mod moderation;

pub use live_chat::LiveChatClient;
pub use moderation::ModerationClient;

use reqwest::StatusCode;

/// Errors produced by the HTTP transports.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream returned a non-2xx status code without a readable error body.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// A page was fetched but did not embed the expected initial state.
    #[error("document does not embed {0}")]
    MissingEmbeddedData(&'static str),
}
