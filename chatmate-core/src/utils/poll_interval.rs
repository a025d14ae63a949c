//! Adaptive poll cadence.
//!
//! The next poll delay is derived from how busy the chat has been over a
//! trailing window. Each event inside the window is weighted by
//! `sqrt(position)`, where `position` is 0 at the window start and 1 at
//! "now", so recent events count more than stale ones. The weighted count per
//! second is mapped linearly (and clamped) from `[min_rate, max_rate]` onto
//! `[max_interval, min_interval]`.

use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Events per second at or below which polling is slowest.
    pub min_rate: f64,
    /// Events per second at or above which polling is fastest.
    pub max_rate: f64,
    /// Length of the trailing window.
    pub window: Duration,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_millis(3000),
            min_rate: 0.05,
            max_rate: 1.0,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntervalEstimator {
    config: EstimatorConfig,
}

impl IntervalEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn window_start(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - self.config.window
    }

    /// Weight in `[0, 1]` of an event at `timestamp`; 0 outside the window.
    ///
    /// Timestamps slightly ahead of `now` (upstream clock skew) clamp to 1.
    pub fn weight(&self, timestamp: OffsetDateTime, now: OffsetDateTime) -> f64 {
        let start = self.window_start(now);
        if timestamp < start {
            return 0.0;
        }
        let span = (now - start).as_seconds_f64();
        if span <= 0.0 {
            return 1.0;
        }
        let position = ((timestamp - start).as_seconds_f64() / span).clamp(0.0, 1.0);
        position.sqrt()
    }

    /// Weighted events per second over the window ending at `now`.
    pub fn rate(
        &self,
        timestamps: impl IntoIterator<Item = OffsetDateTime>,
        now: OffsetDateTime,
    ) -> f64 {
        let window_secs = self.config.window.as_secs_f64();
        if window_secs <= 0.0 {
            return 0.0;
        }
        let total: f64 = timestamps
            .into_iter()
            .map(|t| self.weight(t, now))
            .sum();
        total / window_secs
    }

    /// Linear, clamped, inverse mapping of `rate` onto the interval range.
    pub fn interval_for_rate(&self, rate: f64) -> Duration {
        let EstimatorConfig {
            min_interval,
            max_interval,
            min_rate,
            max_rate,
            ..
        } = self.config;

        let rate_span = max_rate - min_rate;
        let fraction = if rate_span > 0.0 {
            ((rate - min_rate) / rate_span).clamp(0.0, 1.0)
        } else if rate >= max_rate {
            1.0
        } else {
            0.0
        };

        let max_ms = max_interval.as_millis() as f64;
        let min_ms = min_interval.as_millis() as f64;
        let millis = max_ms - fraction * (max_ms - min_ms);
        Duration::from_millis(millis.round() as u64)
    }

    /// Delay before the next poll.
    ///
    /// A poll that itself returned new events short-circuits to
    /// `min_interval` so bursts are followed immediately.
    pub fn next_interval(
        &self,
        timestamps: impl IntoIterator<Item = OffsetDateTime>,
        now: OffsetDateTime,
        had_new_events: bool,
    ) -> Duration {
        if had_new_events {
            return self.config.min_interval;
        }
        self.interval_for_rate(self.rate(timestamps, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn estimator() -> IntervalEstimator {
        IntervalEstimator::new(EstimatorConfig::default())
    }

    #[test]
    fn test_boundary_rates() {
        let est = estimator();
        assert_eq!(est.interval_for_rate(0.05), Duration::from_millis(3000));
        assert_eq!(est.interval_for_rate(1.0), Duration::from_millis(500));
        assert_eq!(est.interval_for_rate(0.0), Duration::from_millis(3000));
        assert_eq!(est.interval_for_rate(25.0), Duration::from_millis(500));
    }

    #[test]
    fn test_interval_is_monotonic_in_rate() {
        let est = estimator();
        let mut previous = est.interval_for_rate(0.05);
        for step in 1..=95 {
            let rate = 0.05 + step as f64 * 0.01;
            let interval = est.interval_for_rate(rate);
            assert!(interval <= previous, "rate {rate} gave {interval:?} > {previous:?}");
            previous = interval;
        }
    }

    #[test]
    fn test_weights_favour_recent_events() {
        let est = estimator();
        let now = now();
        assert_eq!(est.weight(now, now), 1.0);
        assert_eq!(est.weight(now - Duration::from_secs(60), now), 0.0);
        assert_eq!(est.weight(now - Duration::from_secs(61), now), 0.0);
        assert_eq!(est.weight(now + Duration::from_secs(2), now), 1.0);
        // Halfway through the window weighs sqrt(0.5).
        let half = est.weight(now - Duration::from_secs(30), now);
        assert!((half - 0.5f64.sqrt()).abs() < 1e-9);
        assert!(est.weight(now - Duration::from_secs(10), now) > half);
    }

    #[test]
    fn test_busy_window_polls_faster_than_quiet_window() {
        let est = estimator();
        let now = now();
        let quiet: Vec<_> = (0..3).map(|i| now - Duration::from_secs(50 - i)).collect();
        let busy: Vec<_> = (0..40).map(|i| now - Duration::from_millis(i * 500)).collect();

        let quiet_interval = est.next_interval(quiet.clone(), now, false);
        let busy_interval = est.next_interval(busy.clone(), now, false);
        assert!(est.rate(quiet, now) < est.rate(busy, now));
        assert!(busy_interval < quiet_interval);
        assert_eq!(est.next_interval(Vec::new(), now, false), Duration::from_millis(3000));
    }

    #[test]
    fn test_new_events_bypass_window() {
        let est = estimator();
        assert_eq!(
            est.next_interval(Vec::new(), now(), true),
            Duration::from_millis(500)
        );
    }
}
