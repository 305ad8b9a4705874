//! Shared error-context helpers, limits and host path helpers used across all warden crates.

pub mod error;
pub mod limits;
pub mod paths;

pub use error::FromMessage;
