//! Moderation transport: issues the fixed-duration timeout grant.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use super::ClientError;

/// Typed HTTP client for the moderation API.
///
/// Upstream only accepts a timeout of a fixed length per call; longer
/// sanctions are built by renewing the grant before it lapses.
#[derive(Debug, Clone)]
pub struct ModerationClient {
    http: Client,
    base_url: Url,
    access_token: String,
}

impl ModerationClient {
    pub fn new(base_url: Url, access_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            access_token: access_token.into(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /youtube/v3/liveChat/bans?part=snippet` – time out `channel_id`
    /// in `live_chat_id` for `duration`.
    pub async fn apply_timeout(
        &self,
        live_chat_id: &str,
        channel_id: &str,
        duration: Duration,
    ) -> Result<(), ClientError> {
        let url = self.base_url.join("/youtube/v3/liveChat/bans?part=snippet")?;
        let body = serde_json::json!({
            "snippet": {
                "liveChatId": live_chat_id,
                "type": "temporary",
                "banDurationSeconds": duration.as_secs(),
                "bannedUserDetails": { "channelId": channel_id },
            }
        });

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }
        Ok(())
    }
}
