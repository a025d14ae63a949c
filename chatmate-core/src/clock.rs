//! Wall-clock sources.
//!
//! Scheduling code never calls `OffsetDateTime::now_utc()` directly; it asks
//! a [`Clock`]. This keeps the sanction state machine and the poll estimator
//! testable against tokio's virtual time.

use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// The operating system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Wall time sampled once, then advanced by tokio's monotonic clock.
///
/// A step of the system clock (NTP correction, manual change) does not move
/// this clock, so renewal deadlines computed from it stay consistent with the
/// tokio timers that fire them. Under `tokio::time::pause` it follows virtual
/// time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_wall: OffsetDateTime,
    anchor: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::anchored_at(OffsetDateTime::now_utc())
    }

    pub fn anchored_at(wall: OffsetDateTime) -> Self {
        Self {
            anchor_wall: wall,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> OffsetDateTime {
        self.anchor_wall + self.anchor.elapsed()
    }
}
