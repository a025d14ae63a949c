#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod entities;
pub mod framework;
pub mod processors;
pub mod scrape;
pub mod store;
pub mod timer;
pub mod utils;
