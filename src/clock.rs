//! Wall-clock helpers
//!
//! Expiry is absolute wall-clock time, stored as unix seconds in an `f64`
//! (the same representation the persistent tier writes to its sidecars).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix seconds.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_monotonic_enough() {
        let a = unix_now();
        let b = unix_now();
        assert!(b >= a);
        // Sometime after 2020.
        assert!(a > 1_577_836_800.0);
    }
}
