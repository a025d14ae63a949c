//! Shared types for Chatmate.
//!
//! The `objects` module carries the normalized poll envelope, chat events and
//! stream metadata. HTTP transports live behind the `client` feature.

#[cfg(feature = "client")]
pub mod client;
pub mod objects;
