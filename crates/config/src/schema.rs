//! Config schema types (ipc, watch, engine).

use std::{path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    warden_common::{limits::DEFAULT_DEBOUNCE_MS, paths::default_endpoint},
};

/// Engine backend compiled into every build.
pub const MEMORY_BACKEND: &str = "memory";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub ipc: IpcConfig,
    pub watch: WatchSection,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path or pipe name. Platform default when unset.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// Enables watching at startup when set.
    pub policy_path: Option<PathBuf>,
    pub debounce_ms: u64,
    /// Delay between attempts to re-establish a failed file watch.
    pub resubscribe_secs: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            policy_path: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            resubscribe_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: String,
    /// Upper bound on one apply; `0` waits forever.
    pub apply_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: MEMORY_BACKEND.into(),
            apply_timeout_secs: 30,
        }
    }
}

impl WardenConfig {
    /// Configured endpoint, or the platform default.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.ipc.endpoint.clone().unwrap_or_else(default_endpoint)
    }

    #[must_use]
    pub fn apply_timeout(&self) -> Option<Duration> {
        match self.engine.apply_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    #[must_use]
    pub fn resubscribe_interval(&self) -> Duration {
        Duration::from_secs(self.watch.resubscribe_secs.max(1))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: WardenConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, WardenConfig::default());
        assert_eq!(cfg.watch.debounce_ms, 1000);
        assert_eq!(cfg.engine.backend, "memory");
        assert_eq!(cfg.apply_timeout(), Some(Duration::from_secs(30)));
        assert!(cfg.watch.policy_path.is_none());
    }

    #[test]
    fn zero_timeout_disables_it() {
        let cfg: WardenConfig = toml::from_str("[engine]\napply_timeout_secs = 0\n").unwrap();
        assert_eq!(cfg.apply_timeout(), None);
        assert_eq!(cfg.engine.backend, MEMORY_BACKEND);
    }

    #[test]
    fn explicit_endpoint_wins() {
        let cfg: WardenConfig = toml::from_str("[ipc]\nendpoint = \"/run/w.sock\"\n").unwrap();
        assert_eq!(cfg.endpoint(), "/run/w.sock");
        assert!(!WardenConfig::default().endpoint().is_empty());
    }
}
