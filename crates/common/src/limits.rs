//! Bounds shared by the config loader, the IPC layer and the watch supervisor.

/// Smallest accepted debounce interval.
pub const DEBOUNCE_MIN_MS: u64 = 100;

/// Largest accepted debounce interval.
pub const DEBOUNCE_MAX_MS: u64 = 30_000;

pub const DEFAULT_DEBOUNCE_MS: u64 = 1_000;

/// Returns `true` when `ms` lies inside `[DEBOUNCE_MIN_MS, DEBOUNCE_MAX_MS]`.
#[must_use]
pub fn debounce_in_range(ms: u64) -> bool {
    (DEBOUNCE_MIN_MS..=DEBOUNCE_MAX_MS).contains(&ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive() {
        assert!(debounce_in_range(100));
        assert!(debounce_in_range(30_000));
        assert!(debounce_in_range(DEFAULT_DEBOUNCE_MS));
        assert!(!debounce_in_range(99));
        assert!(!debounce_in_range(30_001));
        assert!(!debounce_in_range(0));
    }
}
