use std::path::{Path, PathBuf};

use {
    tracing::{debug, warn},
    warden_common::limits::debounce_in_range,
};

use crate::{env_subst::substitute_env, schema::WardenConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["warden.toml", "warden.yaml", "warden.yml", "warden.json"];

pub const ENV_POLICY_PATH: &str = "WARDEN_POLICY_PATH";
pub const ENV_DEBOUNCE_MS: &str = "WARDEN_DEBOUNCE_MS";
pub const ENV_IPC_ENDPOINT: &str = "WARDEN_IPC_ENDPOINT";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<WardenConfig> {
    let value = load_config_value(path)?;
    serde_json::from_value(value)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
}

/// Read, env-substitute and parse a config file into a format-neutral value.
pub fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config_value(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./warden.{toml,yaml,yml,json}`
/// 2. the user config dir (`~/.config/warden/` on Linux)
///
/// Returns `WardenConfig::default()` if no config file is found or it fails to load.
pub fn discover_and_load() -> WardenConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    WardenConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "warden").map(|d| d.config_dir().to_path_buf())
}

/// Overlay `WARDEN_*` environment variables onto `config`.
#[must_use]
pub fn apply_env_overrides(config: WardenConfig) -> WardenConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: WardenConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> WardenConfig {
    if let Some(path) = lookup(ENV_POLICY_PATH).filter(|v| !v.is_empty()) {
        config.watch.policy_path = Some(PathBuf::from(path));
    }
    if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
        match raw.trim().parse::<u64>() {
            Ok(ms) if debounce_in_range(ms) => config.watch.debounce_ms = ms,
            _ => warn!(var = ENV_DEBOUNCE_MS, value = %raw, "ignoring invalid debounce override"),
        }
    }
    if let Some(endpoint) = lookup(ENV_IPC_ENDPOINT).filter(|v| !v.is_empty()) {
        config.ipc.endpoint = Some(endpoint);
    }
    config
}

fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
