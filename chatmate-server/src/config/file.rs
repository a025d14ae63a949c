//! TOML file configuration structures.
//!
//! These structs directly map to the `chatmate.toml` file format. Every
//! section is optional and falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub estimator: EstimatorConfig,
    pub metadata: MetadataConfig,
    pub moderation: ModerationConfig,
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
        }
    }
}

/// Upstream live chat web client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root URL of the upstream site.
    pub base_url: String,
    /// Web client version reported in every request context.
    pub client_version: String,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.youtube.com".to_owned(),
            client_version: "2.20240101.00.00".to_owned(),
            request_timeout_secs: 10,
        }
    }
}

/// Poll cadence bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Events per second at or below which polling is slowest.
    pub min_rate: f64,
    /// Events per second at or above which polling is fastest.
    pub max_rate: f64,
    pub window_secs: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_interval_ms: 3000,
            min_rate: 0.05,
            max_rate: 1.0,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub refresh_interval_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub api_base_url: String,
    /// OAuth bearer token. Without it renewals are only logged.
    pub access_token: Option<String>,
    /// Fixed length of one upstream timeout.
    pub sanction_duration_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com".to_owned(),
            access_token: None,
            sanction_duration_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub video_id: String,
}
