pub mod poll_interval;
pub mod sanction_interval;

pub use poll_interval::{EstimatorConfig, IntervalEstimator};
pub use sanction_interval::{SanctionInterval, next_sanction_interval};
