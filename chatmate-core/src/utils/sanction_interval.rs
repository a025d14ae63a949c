//! Renewal decisions for fixed-duration external sanctions.
//!
//! Upstream only grants timeouts of one fixed length `D`. To hold a sanction
//! until an arbitrary `expiration`, the grant is re-issued while more than
//! one window remains, and the last renewal is placed so that the final
//! grant lapses exactly at `expiration`.

use std::time::Duration;
use time::OffsetDateTime;

/// The next scheduling decision for one tracked sanction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionInterval {
    /// Stop renewing.
    NoMore,
    /// Renew exactly once more after `interval`, then stop.
    OneMore { interval: Duration },
    /// Renew every `interval` (the grant duration) for now.
    ManyMore { interval: Duration },
}

impl SanctionInterval {
    /// Delay until the next renewal, or `None` when no renewal is due.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            SanctionInterval::NoMore => None,
            SanctionInterval::OneMore { interval } | SanctionInterval::ManyMore { interval } => {
                Some(*interval)
            }
        }
    }
}

/// Decide the next renewal for a sanction ending at `expiration`, evaluated
/// at `now`, given the fixed grant length and the previous decision.
///
/// Once a trajectory is at `OneMore` or `NoMore`, a remainder of at most one
/// grant always yields `NoMore`. An overdue `ManyMore` evaluation inside the
/// final window still schedules one last renewal, immediately.
pub fn next_sanction_interval(
    expiration: OffsetDateTime,
    now: OffsetDateTime,
    grant: Duration,
    prev: Option<SanctionInterval>,
) -> SanctionInterval {
    let remainder = expiration - now;
    let grant_span = time::Duration::try_from(grant).unwrap_or(time::Duration::MAX);

    let committed_to_stop = matches!(
        prev,
        None | Some(SanctionInterval::NoMore) | Some(SanctionInterval::OneMore { .. })
    );

    if remainder <= grant_span && committed_to_stop {
        SanctionInterval::NoMore
    } else if remainder > grant_span.saturating_mul(2) {
        SanctionInterval::ManyMore { interval: grant }
    } else {
        let interval = Duration::try_from(remainder - grant_span).unwrap_or(Duration::ZERO);
        SanctionInterval::OneMore { interval }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRANT: Duration = Duration::from_secs(5 * 60);

    fn at(minutes_from_now: u64) -> (OffsetDateTime, OffsetDateTime) {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        (now + Duration::from_secs(minutes_from_now * 60), now)
    }

    #[test]
    fn test_short_remainder_is_no_more() {
        let (expiration, now) = at(1);
        assert_eq!(
            next_sanction_interval(expiration, now, GRANT, None),
            SanctionInterval::NoMore
        );
        let (expiration, now) = at(5);
        assert_eq!(
            next_sanction_interval(expiration, now, GRANT, None),
            SanctionInterval::NoMore
        );
    }

    #[test]
    fn test_six_minutes_is_one_more_after_a_minute() {
        let (expiration, now) = at(6);
        assert_eq!(
            next_sanction_interval(expiration, now, GRANT, None),
            SanctionInterval::OneMore {
                interval: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_eleven_minute_trajectory() {
        let (expiration, start) = at(11);
        let first = next_sanction_interval(expiration, start, GRANT, None);
        assert_eq!(first, SanctionInterval::ManyMore { interval: GRANT });

        let second = next_sanction_interval(expiration, start + GRANT, GRANT, Some(first));
        assert_eq!(
            second,
            SanctionInterval::OneMore {
                interval: Duration::from_secs(60)
            }
        );

        let third = next_sanction_interval(
            expiration,
            start + GRANT + Duration::from_secs(60),
            GRANT,
            Some(second),
        );
        assert_eq!(third, SanctionInterval::NoMore);
    }

    #[test]
    fn test_exactly_two_grants_is_one_more() {
        let (expiration, now) = at(10);
        assert_eq!(
            next_sanction_interval(expiration, now, GRANT, None),
            SanctionInterval::OneMore { interval: GRANT }
        );
    }

    #[test]
    fn test_stop_decision_is_never_resurrected() {
        let (expiration, now) = at(11);
        // Repeated evaluations over a shrinking remainder after stopping.
        for elapsed in [360, 400, 500, 600, 660, 700] {
            let decision = next_sanction_interval(
                expiration,
                now + Duration::from_secs(elapsed),
                GRANT,
                Some(SanctionInterval::NoMore),
            );
            assert_eq!(decision, SanctionInterval::NoMore, "elapsed {elapsed}s");
        }
    }

    #[test]
    fn test_overdue_many_more_renews_immediately() {
        let (expiration, now) = at(11);
        let late = now + Duration::from_secs(8 * 60);
        assert_eq!(
            next_sanction_interval(
                expiration,
                late,
                GRANT,
                Some(SanctionInterval::ManyMore { interval: GRANT })
            ),
            SanctionInterval::OneMore {
                interval: Duration::ZERO
            }
        );
    }
}
