//! Cooperative repeating timers.
//!
//! A [`RepeatingTimer`] owns a table of timers keyed by [`TimerId`]. Each
//! timer runs one of three rescheduling disciplines:
//!
//! - `Start`: the next firing is scheduled when the current one begins, so
//!   firings keep a constant period even when callbacks overrun.
//! - `End`: the next firing is scheduled once the callback settles, giving a
//!   constant gap between completion and the next start.
//! - `DynamicEnd`: like `End`, but the gap is whatever the callback returns.
//!
//! Disposing a timer suppresses future firings only. A callback already in
//! flight runs to completion; the timer checks the disposed flag after it
//! settles and before deciding the next delay.

mod repeating;

pub use repeating::RepeatingTimer;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type returned by timer callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Callback for the fixed-interval disciplines.
pub type TimerCallback =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// Callback for `DynamicEnd`; its result decides the next delay.
pub type DynamicTimerCallback =
    Arc<dyn Fn() -> BoxFuture<'static, Result<TimerControl, CallbackError>> + Send + Sync>;

/// What a `DynamicEnd` timer should do after its callback settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    Reschedule(Duration),
    /// Remove the timer; no further firings.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerBehaviour {
    Start,
    End,
    DynamicEnd,
}

pub enum TimerOptions {
    Start {
        interval: Duration,
        callback: TimerCallback,
    },
    End {
        interval: Duration,
        callback: TimerCallback,
    },
    DynamicEnd {
        /// `None` fires the first time immediately.
        initial_interval: Option<Duration>,
        callback: DynamicTimerCallback,
    },
}

impl TimerOptions {
    pub fn start<F, Fut>(interval: Duration, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        TimerOptions::Start {
            interval,
            callback: Arc::new(move || callback().boxed()),
        }
    }

    pub fn end<F, Fut>(interval: Duration, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        TimerOptions::End {
            interval,
            callback: Arc::new(move || callback().boxed()),
        }
    }

    pub fn dynamic_end<F, Fut>(initial_interval: Option<Duration>, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TimerControl, CallbackError>> + Send + 'static,
    {
        TimerOptions::DynamicEnd {
            initial_interval,
            callback: Arc::new(move || callback().boxed()),
        }
    }

    pub fn behaviour(&self) -> TimerBehaviour {
        match self {
            TimerOptions::Start { .. } => TimerBehaviour::Start,
            TimerOptions::End { .. } => TimerBehaviour::End,
            TimerOptions::DynamicEnd { .. } => TimerBehaviour::DynamicEnd,
        }
    }

    /// Delay before the first firing when the timer is not run immediately.
    fn initial_delay(&self) -> Duration {
        match self {
            TimerOptions::Start { interval, .. } | TimerOptions::End { interval, .. } => *interval,
            TimerOptions::DynamicEnd {
                initial_interval, ..
            } => initial_interval.unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Snapshot of a live timer's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerHandle {
    pub id: TimerId,
    pub behaviour: TimerBehaviour,
    pub current_interval: Duration,
    pub disposed: bool,
}

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer callback failed: {0}")]
    Callback(#[source] CallbackError),
}
