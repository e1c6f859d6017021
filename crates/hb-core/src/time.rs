//! Wall-clock helpers for job timestamps
//!
//! Jobs record creation and last-transition times as unix milliseconds so
//! they serialize as plain integers in `info` responses.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds.
///
/// A clock set before the epoch reads as 0 rather than panicking; the only
/// consumer that cares is the retention sweeper, which then simply keeps
/// the job longer.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time elapsed since a millisecond timestamp; zero for future timestamps.
pub fn elapsed_since(millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(millis))
}

/// Whether a millisecond timestamp is at least `age` in the past.
pub fn is_older_than(millis: u64, age: Duration) -> bool {
    elapsed_since(millis) >= age
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_is_after_2020() {
        assert!(current_time_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_future_timestamp_has_no_elapsed_time() {
        let future = current_time_millis() + 60_000;
        assert_eq!(elapsed_since(future), Duration::ZERO);
        assert!(!is_older_than(future, Duration::from_secs(1)));
    }

    #[test]
    fn test_old_timestamp_is_older() {
        let past = current_time_millis().saturating_sub(10_000);
        assert!(is_older_than(past, Duration::from_secs(5)));
        assert!(!is_older_than(past, Duration::from_secs(60)));
    }
}
