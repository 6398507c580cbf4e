//! Wall-clock helpers. Node records and traceroute bookkeeping use whole unix
//! seconds, which is what the device reports in `last_heard` and `rx_time`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds. A clock before the epoch reads as 0.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `now - window`, saturating at 0.
pub fn secs_ago(now: u64, window: std::time::Duration) -> u64 {
    now.saturating_sub(window.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_secs_ago_saturates() {
        assert_eq!(secs_ago(10, Duration::from_secs(60)), 0);
        assert_eq!(secs_ago(100, Duration::from_secs(60)), 40);
    }
}
