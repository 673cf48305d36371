//! Time representation shared by every stored row.
//!
//! Instants are stored as UTC Unix epoch milliseconds; `DateTime<Utc>` only
//! exists at the API boundary.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Convert an instant to its stored form.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert a stored instant back. Out-of-range values clamp to the nearest
/// representable instant.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    match DateTime::from_timestamp_millis(millis) {
        Some(at) => at,
        None if millis < 0 => DateTime::<Utc>::MIN_UTC,
        None => DateTime::<Utc>::MAX_UTC,
    }
}

fn min_millis() -> i64 {
    DateTime::<Utc>::MIN_UTC.timestamp_millis()
}

fn max_millis() -> i64 {
    DateTime::<Utc>::MAX_UTC.timestamp_millis()
}

/// Convert a non-negative span to milliseconds, saturating.
pub fn duration_millis(span: Duration) -> i64 {
    i64::try_from(span.as_millis()).unwrap_or(i64::MAX)
}

/// `at + span` in stored form, capped at the latest representable instant.
pub fn millis_after(at: DateTime<Utc>, span: Duration) -> i64 {
    to_millis(at)
        .saturating_add(duration_millis(span))
        .min(max_millis())
}

/// `at - span` in stored form, capped at the earliest representable instant.
pub fn millis_before(at: DateTime<Utc>, span: Duration) -> i64 {
    to_millis(at)
        .saturating_sub(duration_millis(span))
        .max(min_millis())
}

/// Remaining lifetime of a keyed collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No row for the key carries an expiry (or no row exists).
    NoExpiration,
    /// Time until the earliest expiry. Zero or negative once that instant has
    /// passed but the row has not been reaped yet.
    ExpiresIn(TimeDelta),
}

impl Ttl {
    /// Conventional duration reported for [`Ttl::NoExpiration`].
    pub const NO_EXPIRATION_SECONDS: i64 = -1;

    /// Build from the earliest stored expiry of a key.
    pub fn from_earliest(earliest_millis: Option<i64>, now: DateTime<Utc>) -> Self {
        match earliest_millis {
            None => Self::NoExpiration,
            Some(at) => {
                Self::ExpiresIn(TimeDelta::milliseconds(at.saturating_sub(to_millis(now))))
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::NoExpiration)
    }

    /// Flatten into a single duration, using `-1s` for "no expiration".
    ///
    /// The flattened form is ambiguous: an entry that expired exactly one
    /// second ago also yields `-1s`. Match on the enum to tell them apart.
    pub fn as_duration(&self) -> TimeDelta {
        match self {
            Self::NoExpiration => TimeDelta::seconds(Self::NO_EXPIRATION_SECONDS),
            Self::ExpiresIn(remaining) => *remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_span_keeps_the_instant() {
        let now = Utc::now();
        assert_eq!(millis_after(now, Duration::ZERO), to_millis(now));
    }

    #[test]
    fn absent_expiry_is_the_sentinel() {
        let ttl = Ttl::from_earliest(None, Utc::now());
        assert!(ttl.is_persistent());
        assert_eq!(ttl.as_duration(), TimeDelta::seconds(-1));
    }

    #[test]
    fn passed_expiry_is_not_the_sentinel() {
        let now = Utc::now();
        let ttl = Ttl::from_earliest(Some(to_millis(now) - 5_000), now);
        assert_eq!(ttl, Ttl::ExpiresIn(TimeDelta::milliseconds(-5_000)));
        assert!(!ttl.is_persistent());
    }

    #[test]
    fn expired_one_second_ago_is_distinct_from_no_expiration() {
        let now = Utc::now();
        let ttl = Ttl::from_earliest(Some(to_millis(now) - 1_000), now);
        assert_eq!(ttl.as_duration(), Ttl::NoExpiration.as_duration());
        assert_ne!(ttl, Ttl::NoExpiration);
        assert!(!ttl.is_persistent());
    }

    #[test]
    fn oversized_span_clamps_to_the_latest_instant() {
        let now = Utc::now();
        let stored = millis_after(now, Duration::from_secs(u64::MAX / 4));
        assert!(from_millis(stored) > now);
        assert_eq!(stored, DateTime::<Utc>::MAX_UTC.timestamp_millis());
        assert_eq!(from_millis(millis_after(now, Duration::MAX)), from_millis(stored));
    }

    #[test]
    fn unrepresentable_millis_clamp_toward_their_sign() {
        assert_eq!(from_millis(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(from_millis(i64::MIN), DateTime::<Utc>::MIN_UTC);
        assert!(from_millis(millis_before(Utc::now(), Duration::MAX)) < Utc::now());
    }

    proptest! {
        #[test]
        fn millis_round_trip(millis in -8_000_000_000_000i64..8_000_000_000_000i64) {
            prop_assert_eq!(to_millis(from_millis(millis)), millis);
        }

        #[test]
        fn remaining_shrinks_as_time_advances(ahead in 1i64..1_000_000, step in 1i64..1_000) {
            let now = Utc::now();
            let expiry = to_millis(now) + ahead;
            let earlier = Ttl::from_earliest(Some(expiry), now).as_duration();
            let later = Ttl::from_earliest(Some(expiry), now + TimeDelta::milliseconds(step))
                .as_duration();
            prop_assert!(later < earlier);
        }
    }
}
