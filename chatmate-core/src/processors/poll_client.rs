//! One poll against the live chat continuation protocol.
//!
//! [`PollClient::fetch`] never fails: transport and upstream failures come
//! back inside [`PollResult::error`] with no events and no token, and it is
//! up to the caller to decide what to commit.

use async_trait::async_trait;
use chatmate_sdk::client::{ClientError, LiveChatClient};
use chatmate_sdk::objects::{Action, ChatEvent, ErrorInfo, PollEnvelope};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// The remote side of a poll.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Start of stream: no continuation token yet.
    async fn fetch_initial(&self, video_id: &str) -> Result<PollEnvelope, ClientError>;

    /// Resume from `token`.
    async fn fetch_continuation(&self, token: &str) -> Result<PollEnvelope, ClientError>;
}

#[async_trait]
impl ChatTransport for LiveChatClient {
    async fn fetch_initial(&self, video_id: &str) -> Result<PollEnvelope, ClientError> {
        LiveChatClient::fetch_initial(self, video_id).await
    }

    async fn fetch_continuation(&self, token: &str) -> Result<PollEnvelope, ClientError> {
        LiveChatClient::fetch_continuation(self, token).await
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    /// Timeout, connection failure or an unreadable body.
    #[error("transport error: {0}")]
    Transport(#[from] ClientError),

    /// Upstream answered with an error document.
    #[error("upstream error: {0}")]
    Upstream(ErrorInfo),
}

#[derive(Debug)]
pub struct PollResult {
    /// Correlation id of the request that produced this result.
    pub request_id: u64,
    pub events: Vec<ChatEvent>,
    pub next_token: Option<String>,
    /// Advisory expiry of `next_token`; never used for scheduling.
    pub suggested_timeout: Option<Duration>,
    pub error: Option<PollError>,
}

impl PollResult {
    fn failed(request_id: u64, error: PollError) -> Self {
        Self {
            request_id,
            events: Vec::new(),
            next_token: None,
            suggested_timeout: None,
            error: Some(error),
        }
    }

    fn from_envelope(request_id: u64, envelope: PollEnvelope) -> Self {
        let PollEnvelope {
            actions,
            continuation,
            error,
        } = envelope;

        if let Some(error) = error {
            return Self::failed(request_id, PollError::Upstream(error));
        }

        let mut events = Vec::with_capacity(actions.len());
        let mut removed = 0usize;
        for action in actions {
            match action {
                Action::AddChatItem { event } => events.push(event),
                Action::RemoveChatItem { .. } => removed += 1,
            }
        }
        if removed > 0 {
            debug!(request_id, removed, "Ignoring chat item removals");
        }

        let (next_token, suggested_timeout) = match continuation {
            Some(c) => (Some(c.token), c.timeout_ms.map(Duration::from_millis)),
            None => (None, None),
        };

        Self {
            request_id,
            events,
            next_token,
            suggested_timeout,
            error: None,
        }
    }
}

/// Poll wrapper for one stream.
pub struct PollClient {
    transport: Arc<dyn ChatTransport>,
    video_id: String,
    request_counter: AtomicU64,
}

impl PollClient {
    pub fn new(transport: Arc<dyn ChatTransport>, video_id: impl Into<String>) -> Self {
        Self {
            transport,
            video_id: video_id.into(),
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Number of polls issued so far.
    pub fn request_count(&self) -> u64 {
        self.request_counter.load(Ordering::Relaxed)
    }

    /// Poll once. `None` starts from the beginning of the stream.
    pub async fn fetch(&self, token: Option<&str>) -> PollResult {
        let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            video_id = %self.video_id,
            request_id,
            resume = token.is_some(),
            "Polling live chat"
        );

        let response = match token {
            Some(token) => self.transport.fetch_continuation(token).await,
            None => self.transport.fetch_initial(&self.video_id).await,
        };

        match response {
            Ok(envelope) => PollResult::from_envelope(request_id, envelope),
            Err(e) => {
                warn!(
                    video_id = %self.video_id,
                    request_id,
                    error = %e,
                    "Live chat poll failed"
                );
                PollResult::failed(request_id, PollError::Transport(e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chatmate_sdk::objects::{ChatAuthor, Continuation, MessagePart};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    /// Transport that replays a fixed script and records what it was asked.
    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<PollEnvelope, ClientError>>>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedTransport {
        pub fn push(&self, response: Result<PollEnvelope, ClientError>) {
            self.script.lock().unwrap().push_back(response);
        }

        /// Tokens passed so far; `None` marks a start-of-stream fetch.
        pub fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self, call: Option<String>) -> Result<PollEnvelope, ClientError> {
            self.calls.lock().unwrap().push(call);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(envelope(&[], Some("idle"))))
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn fetch_initial(&self, _video_id: &str) -> Result<PollEnvelope, ClientError> {
            self.next(None)
        }

        async fn fetch_continuation(&self, token: &str) -> Result<PollEnvelope, ClientError> {
            self.next(Some(token.to_owned()))
        }
    }

    pub fn chat_event(id: &str, timestamp: OffsetDateTime) -> ChatEvent {
        ChatEvent {
            external_id: id.to_owned(),
            timestamp,
            author: ChatAuthor {
                channel_id: "UCviewer".to_owned(),
                name: "viewer".to_owned(),
            },
            parts: [MessagePart::Text {
                text: format!("message {id}"),
            }]
            .into_iter()
            .collect(),
        }
    }

    pub fn envelope(events: &[ChatEvent], token: Option<&str>) -> PollEnvelope {
        PollEnvelope {
            actions: events
                .iter()
                .cloned()
                .map(|event| Action::AddChatItem { event })
                .collect(),
            continuation: token.map(|token| Continuation {
                token: token.to_owned(),
                timeout_ms: Some(5_000),
            }),
            error: None,
        }
    }

    pub fn transport_failure() -> ClientError {
        ClientError::MissingEmbeddedData("ytInitialData")
    }
}
