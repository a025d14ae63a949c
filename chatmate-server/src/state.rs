//! Application state shared across all request handlers.

use chatmate_core::config::{ConfigStore, StreamsConfig};
use chatmate_core::processors::SanctionScheduler;
use chatmate_core::store::EventStore;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub sanctions: SanctionScheduler,
    /// Stream list (can be reloaded via SIGHUP).
    pub streams: ConfigStore<StreamsConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EventStore>,
        sanctions: SanctionScheduler,
        streams: ConfigStore<StreamsConfig>,
    ) -> Self {
        Self {
            store,
            sanctions,
            streams,
        }
    }
}
