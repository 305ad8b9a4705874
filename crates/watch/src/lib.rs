//! Policy file watching for warden.
//!
//! [`WatchSupervisor`] owns the watch configuration, a per-watch worker that
//! debounces filesystem events, and the status counters exposed over IPC.
//! Every apply goes through one gate so the filter engine is never driven
//! concurrently.

pub mod debounce;
pub mod error;
pub mod source;
pub mod status;
pub mod supervisor;

pub use {
    debounce::Debouncer,
    error::{Error, Result},
    source::{ChangeEvent, ChangeSource, ManualSource, NotifySource, Subscription},
    status::{WatchConfig, WatchStatus},
    supervisor::{SetOutcome, WatchSupervisor},
};
