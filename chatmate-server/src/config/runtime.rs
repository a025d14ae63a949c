//! Validated runtime configuration.
//!
//! Section types live in `chatmate-core` so processors can take them
//! directly; this module assembles them.

pub use chatmate_core::config::{
    ClientConfig, MetadataConfig, ModerationConfig, StreamConfig, StreamsConfig,
};
pub use chatmate_core::utils::EstimatorConfig;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Everything read from the config file, after validation.
///
/// Only `streams` is applied again on reload; the other sections are fixed
/// for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub estimator: EstimatorConfig,
    pub metadata: MetadataConfig,
    pub moderation: ModerationConfig,
    pub streams: StreamsConfig,
}
