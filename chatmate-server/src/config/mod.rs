//! Configuration module for chatmate-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::FileConfig;
use crate::config::runtime::{
    ClientConfig, EstimatorConfig, MetadataConfig, ModerationConfig, RuntimeConfig, ServerConfig,
    StreamConfig, StreamsConfig,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid url for {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides, validate, and convert.
    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        build_runtime_config(file_config)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<RuntimeConfig, ConfigError> {
        self.load()
    }
}

/// Validate a parsed file and convert it into runtime types.
pub fn build_runtime_config(file_config: FileConfig) -> Result<RuntimeConfig, ConfigError> {
    validate(&file_config)?;
    let FileConfig {
        server,
        client,
        estimator,
        metadata,
        moderation,
        streams,
    } = file_config;

    Ok(RuntimeConfig {
        server: ServerConfig {
            listen: server.listen,
        },
        client: ClientConfig {
            base_url: parse_url("client.base_url", &client.base_url)?,
            client_version: client.client_version,
            request_timeout: Duration::from_secs(client.request_timeout_secs),
        },
        estimator: EstimatorConfig {
            min_interval: Duration::from_millis(estimator.min_interval_ms),
            max_interval: Duration::from_millis(estimator.max_interval_ms),
            min_rate: estimator.min_rate,
            max_rate: estimator.max_rate,
            window: Duration::from_secs(estimator.window_secs),
        },
        metadata: MetadataConfig {
            refresh_interval: Duration::from_secs(metadata.refresh_interval_secs),
        },
        moderation: ModerationConfig {
            api_base_url: parse_url("moderation.api_base_url", &moderation.api_base_url)?,
            access_token: moderation.access_token.filter(|t| !t.is_empty()),
            sanction_duration: Duration::from_secs(moderation.sanction_duration_secs),
        },
        streams: StreamsConfig {
            streams: streams
                .into_iter()
                .map(|s| StreamConfig::new(s.video_id))
                .collect(),
        },
    })
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let estimator = &config.estimator;
    if estimator.min_interval_ms == 0 || estimator.min_interval_ms > estimator.max_interval_ms {
        return Err(ConfigError::ValidationError(format!(
            "estimator intervals must satisfy 0 < min ({}) <= max ({})",
            estimator.min_interval_ms, estimator.max_interval_ms
        )));
    }
    if !(estimator.min_rate >= 0.0 && estimator.min_rate < estimator.max_rate) {
        return Err(ConfigError::ValidationError(format!(
            "estimator rates must satisfy 0 <= min ({}) < max ({})",
            estimator.min_rate, estimator.max_rate
        )));
    }
    if estimator.window_secs == 0 {
        return Err(ConfigError::ValidationError(
            "estimator window must be positive".to_owned(),
        ));
    }
    if config.metadata.refresh_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "metadata refresh interval must be positive".to_owned(),
        ));
    }
    if config.moderation.sanction_duration_secs == 0 {
        return Err(ConfigError::ValidationError(
            "sanction duration must be positive".to_owned(),
        ));
    }

    let mut seen = HashSet::new();
    for stream in &config.streams {
        if stream.video_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "stream video_id must not be empty".to_owned(),
            ));
        }
        if !seen.insert(stream.video_id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "stream {} is configured twice",
                stream.video_id
            )));
        }
    }
    Ok(())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::StreamConfig as FileStreamConfig;

    fn with_streams(ids: &[&str]) -> FileConfig {
        FileConfig {
            streams: ids
                .iter()
                .map(|id| FileStreamConfig {
                    video_id: (*id).to_owned(),
                })
                .collect(),
            ..FileConfig::default()
        }
    }

    #[test]
    fn test_defaults_convert() {
        let config = build_runtime_config(with_streams(&["abc"])).unwrap();
        assert_eq!(config.estimator.min_interval, Duration::from_millis(500));
        assert_eq!(config.estimator.window, Duration::from_secs(60));
        assert_eq!(config.moderation.sanction_duration, Duration::from_secs(300));
        assert_eq!(config.client.base_url.as_str(), "https://www.youtube.com/");
        assert!(config.streams.contains("abc"));
    }

    #[test]
    fn test_rejects_duplicate_streams() {
        let err = build_runtime_config(with_streams(&["abc", "abc"])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_rejects_inverted_intervals() {
        let mut config = FileConfig::default();
        config.estimator.min_interval_ms = 5000;
        assert!(matches!(
            build_runtime_config(config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_bad_url() {
        let mut config = FileConfig::default();
        config.client.base_url = "not a url".to_owned();
        assert!(matches!(
            build_runtime_config(config),
            Err(ConfigError::InvalidUrl { field: "client.base_url", .. })
        ));
    }

    #[test]
    fn test_empty_token_means_no_token() {
        let mut config = FileConfig::default();
        config.moderation.access_token = Some(String::new());
        let runtime = build_runtime_config(config).unwrap();
        assert!(runtime.moderation.access_token.is_none());
    }

    #[test]
    fn test_loader_applies_listen_override() {
        let path = std::env::temp_dir().join(format!("chatmate-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[[streams]]\nvideo_id = \"xyz\"\n").unwrap();
        let listen: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let config = ConfigLoader::new(&path, Some(listen)).load().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.server.listen, listen);
        assert_eq!(config.streams.streams.len(), 1);
    }
}
