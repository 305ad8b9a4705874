//! Configuration loading, env substitution and validation.
//!
//! Config files: `warden.toml`, `warden.yaml`/`warden.yml`, or `warden.json`,
//! searched in `./` then the user config dir.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw text,
//! plus `WARDEN_*` overrides applied after parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{EngineConfig, IpcConfig, MEMORY_BACKEND, WardenConfig, WatchSection},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
