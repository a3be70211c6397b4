//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_seconds_is_current_era() {
        let now = unix_seconds();
        // After 2020, before 2100.
        assert!(now > 1_577_836_800);
        assert!(now < 4_102_444_800);
    }
}
