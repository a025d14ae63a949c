//! Live chat poll transport.
//!
//! A fresh session starts by loading the chat page, which embeds the first
//! batch and continuation. Every later poll POSTs the previous continuation
//! to the chat endpoint. Both paths decode into the same [`PollEnvelope`].

use reqwest::Client;
use url::Url;

use super::ClientError;
use crate::objects::embedded::extract_embedded;
use crate::objects::envelope::{InitialLiveChatData, LiveChatResponse, PollEnvelope};

const INITIAL_DATA_MARKER: &str = "ytInitialData";

/// Typed HTTP client for the live chat endpoints.
#[derive(Debug, Clone)]
pub struct LiveChatClient {
    http: Client,
    base_url: Url,
    client_version: String,
}

impl LiveChatClient {
    /// Create a new `LiveChatClient`.
    ///
    /// * `base_url` – root URL of the upstream site (e.g. `https://www.youtube.com`).
    /// * `client_version` – web client version reported in the request context.
    pub fn new(base_url: Url, client_version: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            client_version: client_version.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one (e.g. to
    /// configure timeouts or a proxy).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `GET /live_chat?v={video_id}` – start of stream.
    pub async fn fetch_initial(&self, video_id: &str) -> Result<PollEnvelope, ClientError> {
        let mut url = self.base_url.join("/live_chat")?;
        url.query_pairs_mut()
            .append_pair("v", video_id)
            .append_pair("is_popout", "1");

        let document = self.get_document(url).await?;
        parse_initial_page(&document)
    }

    /// `POST /youtubei/v1/live_chat/get_live_chat` – resume from `token`.
    pub async fn fetch_continuation(&self, token: &str) -> Result<PollEnvelope, ClientError> {
        let url = self
            .base_url
            .join("/youtubei/v1/live_chat/get_live_chat?prettyPrint=false")?;
        let body = serde_json::json!({
            "context": {
                "client": {
                    "clientName": "WEB",
                    "clientVersion": self.client_version,
                }
            },
            "continuation": token,
        });

        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        // Upstream reports logical errors as a JSON `error` object, usually
        // with a 4xx status. Those become `PollEnvelope::error`; anything
        // else unreadable is a transport failure.
        match serde_json::from_slice::<LiveChatResponse>(&bytes) {
            Ok(response) if status.is_success() || response.error.is_some() => Ok(response.into()),
            Ok(_) => Err(ClientError::Api {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) if status.is_success() => Err(ClientError::Json(e)),
            Err(_) => Err(ClientError::Api {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
        }
    }

    /// `GET /watch?v={video_id}` – the document the metadata scrape reads.
    pub async fn fetch_watch_page(&self, video_id: &str) -> Result<String, ClientError> {
        let mut url = self.base_url.join("/watch")?;
        url.query_pairs_mut().append_pair("v", video_id);
        self.get_document(url).await
    }

    async fn get_document(&self, url: Url) -> Result<String, ClientError> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }
        Ok(resp.text().await?)
    }
}

/// Decode the first batch and continuation embedded in the chat page.
fn parse_initial_page(document: &str) -> Result<PollEnvelope, ClientError> {
    let data: InitialLiveChatData = extract_embedded(document, INITIAL_DATA_MARKER)
        .ok_or(ClientError::MissingEmbeddedData(INITIAL_DATA_MARKER))??;
    Ok(data.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::envelope::Action;

    #[test]
    fn test_chat_page_starts_a_session() {
        let html = r#"<html><script nonce="x">window["ytInitialData"] = {"responseContext":{},"contents":{"liveChatRenderer":{"continuations":[{"invalidationContinuationData":{"continuation":"tok-0","timeoutMs":10000}}],"actions":[{"addChatItemAction":{"item":{"liveChatTextMessageRenderer":{"id":"m1","timestampUsec":"1700000000000000","authorName":{"simpleText":"viewer"},"authorExternalChannelId":"UC1","message":{"runs":[{"text":"hello"}]}}}}}]}}};</script></html>"#;

        let envelope = parse_initial_page(html).unwrap();
        assert_eq!(envelope.continuation.unwrap().token, "tok-0");
        assert_eq!(envelope.actions.len(), 1);
        let Action::AddChatItem { event } = &envelope.actions[0] else {
            panic!("expected a chat item");
        };
        assert_eq!(event.text(), "hello");
    }

    #[test]
    fn test_page_without_initial_data_is_an_error() {
        let err = parse_initial_page("<html><body>consent</body></html>").unwrap_err();
        assert!(matches!(err, ClientError::MissingEmbeddedData("ytInitialData")));
    }
}
