//! Watch configuration and the observable status snapshot.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    warden_common::limits::{DEFAULT_DEBOUNCE_MS, debounce_in_range},
    warden_engine::{ApplySuccess, DomainError},
};

use crate::error::{Error, Result};

/// What the supervisor watches. Watching is enabled iff a policy path is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    policy_path: Option<PathBuf>,
    debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl WatchConfig {
    pub fn disabled(debounce_ms: u64) -> Result<Self> {
        check_debounce(debounce_ms)?;
        Ok(Self {
            policy_path: None,
            debounce_ms,
        })
    }

    pub fn watching(policy_path: impl Into<PathBuf>, debounce_ms: u64) -> Result<Self> {
        check_debounce(debounce_ms)?;
        let policy_path = policy_path.into();
        if policy_path.as_os_str().is_empty() {
            return Err(Error::EmptyPolicyPath);
        }
        Ok(Self {
            policy_path: Some(policy_path),
            debounce_ms,
        })
    }

    /// Same interval, no path.
    #[must_use]
    pub fn to_disabled(&self) -> Self {
        Self {
            policy_path: None,
            debounce_ms: self.debounce_ms,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.policy_path.is_some()
    }

    #[must_use]
    pub fn policy_path(&self) -> Option<&Path> {
        self.policy_path.as_deref()
    }

    #[must_use]
    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn check_debounce(ms: u64) -> Result<()> {
    if debounce_in_range(ms) {
        Ok(())
    } else {
        Err(Error::InvalidDebounce { ms })
    }
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchStatus {
    pub watching: bool,
    pub policy_path: Option<PathBuf>,
    pub debounce_ms: u64,
    pub last_apply_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub apply_count: u64,
    pub error_count: u64,
}

impl Default for WatchStatus {
    fn default() -> Self {
        Self {
            watching: false,
            policy_path: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            last_apply_time: None,
            last_error: None,
            last_error_time: None,
            apply_count: 0,
            error_count: 0,
        }
    }
}

impl WatchStatus {
    /// Fold one apply outcome into the counters.
    ///
    /// A no-op success (policy unchanged) refreshes `last_apply_time` but
    /// leaves `apply_count` alone.
    pub fn record(&mut self, outcome: &std::result::Result<ApplySuccess, DomainError>, at: DateTime<Utc>) {
        match outcome {
            Ok(success) => {
                if success.changed {
                    self.apply_count += 1;
                }
                self.last_apply_time = Some(at);
            },
            Err(e) => {
                self.error_count += 1;
                self.last_error = Some(e.message().to_string());
                self.last_error_time = Some(at);
            },
        }
    }

    /// Start a fresh counting epoch.
    pub fn reset_counters(&mut self) {
        self.last_apply_time = None;
        self.last_error = None;
        self.last_error_time = None;
        self.apply_count = 0;
        self.error_count = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest, warden_engine::ErrorCode};

    #[rstest]
    #[case(100, true)]
    #[case(1_000, true)]
    #[case(30_000, true)]
    #[case(99, false)]
    #[case(30_001, false)]
    fn debounce_bounds(#[case] ms: u64, #[case] ok: bool) {
        assert_eq!(WatchConfig::watching("/p.toml", ms).is_ok(), ok);
        assert_eq!(WatchConfig::disabled(ms).is_ok(), ok);
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(
            WatchConfig::watching("", 1000),
            Err(Error::EmptyPolicyPath)
        ));
    }

    #[test]
    fn enabled_tracks_path() {
        assert!(!WatchConfig::disabled(1000).unwrap().enabled());
        let cfg = WatchConfig::watching("/etc/warden/policy.toml", 250).unwrap();
        assert!(cfg.enabled());
        assert_eq!(cfg.policy_path(), Some(Path::new("/etc/warden/policy.toml")));
        assert_eq!(cfg.debounce(), Duration::from_millis(250));
    }

    #[test]
    fn outcomes_move_independent_counters() {
        let mut status = WatchStatus::default();
        let now = Utc::now();
        status.record(
            &Ok(ApplySuccess {
                changed: true,
                filter_count: 1,
                fingerprint: "f".into(),
            }),
            now,
        );
        status.record(
            &Err(DomainError::new(ErrorCode::NotFound, "policy file not found: /p")),
            now,
        );

        assert_eq!(status.apply_count, 1);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_apply_time, Some(now));
        assert_eq!(status.last_error.as_deref(), Some("policy file not found: /p"));

        status.reset_counters();
        assert_eq!(status.apply_count, 0);
        assert!(status.last_error_time.is_none());
    }

    #[test]
    fn unchanged_policy_does_not_count_as_an_apply() {
        let mut status = WatchStatus::default();
        let first = Utc::now();
        let later = first + chrono::Duration::seconds(5);
        let success = |changed| ApplySuccess {
            changed,
            filter_count: 2,
            fingerprint: "f".into(),
        };

        status.record(&Ok(success(true)), first);
        status.record(&Ok(success(false)), later);

        assert_eq!(status.apply_count, 1);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.last_apply_time, Some(later));
    }
}
