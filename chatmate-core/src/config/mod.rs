//! Runtime configuration types shared between the core and the server.
//!
//! The server crate parses the TOML file and converts it into these
//! validated types. Sections that may change while running are wrapped in a
//! [`ConfigStore`].

mod config_store;
mod streams;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use streams::{StreamConfig, StreamsConfig};

use std::time::Duration;
use url::Url;

/// Settings for the upstream live chat web client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub client_version: String,
    pub request_timeout: Duration,
}

/// Settings for the watch page metadata refresh.
#[derive(Debug, Clone, Copy)]
pub struct MetadataConfig {
    pub refresh_interval: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(15),
        }
    }
}

/// Settings for the moderation API used to renew sanctions.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    pub api_base_url: Url,
    /// Without a token, renewals are logged but not sent.
    pub access_token: Option<String>,
    /// Length of a single upstream timeout grant.
    pub sanction_duration: Duration,
}
