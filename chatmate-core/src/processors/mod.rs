//! Long-running processors, each driven by a `RepeatingTimer`:
//!
//! - `IngestionLoop`: polls one stream's chat and persists it
//! - `MetadataWatcher`: scrapes one stream's watch page, halts ingestion when the stream ends
//! - `StreamManager`: runs the two above per configured stream
//! - `SanctionScheduler`: renews fixed-length timeouts until their expiration

pub mod ingestion;
pub mod metadata_watcher;
pub mod poll_client;
pub mod sanction_scheduler;
pub mod stream_manager;

pub use ingestion::{HaltSignal, IngestionLoop};
pub use metadata_watcher::{MetadataWatcher, WatchPageSource};
pub use poll_client::{ChatTransport, PollClient, PollError, PollResult};
pub use sanction_scheduler::{RefreshFn, SanctionError, SanctionId, SanctionScheduler, SanctionTracking};
pub use stream_manager::{ActiveStream, StreamContext, StreamManager};
