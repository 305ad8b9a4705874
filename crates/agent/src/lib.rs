//! The warden agent.
//!
//! Wires the apply pipeline and watch supervisor to a local control channel
//! speaking newline-delimited JSON, and provides the matching client.

pub mod client;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod server;

pub use {
    daemon::{Agent, build_engine},
    dispatch::Dispatcher,
    error::{Error, Result},
};
