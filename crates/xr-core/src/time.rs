//! Time utilities for Xeray
//!
//! Record timestamps are Unix seconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock reads earlier than the Unix epoch.
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Seconds elapsed since a Unix timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_secs(since: u64) -> u64 {
    current_time_secs().saturating_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_secs_is_positive() {
        assert!(current_time_secs() > 0);
    }

    #[test]
    fn test_elapsed_secs_future_time() {
        let future = current_time_secs() + 1000;
        assert_eq!(elapsed_secs(future), 0);
    }

    #[test]
    fn test_elapsed_secs_past_time() {
        let past = current_time_secs() - 60;
        assert!(elapsed_secs(past) >= 60);
    }
}
