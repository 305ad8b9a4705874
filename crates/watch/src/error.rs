use std::path::PathBuf;

use {
    notify_debouncer_full::notify,
    thiserror::Error,
    warden_common::{
        FromMessage,
        limits::{DEBOUNCE_MAX_MS, DEBOUNCE_MIN_MS},
    },
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "debounceMs must be between {min} and {max}, got {ms}",
        min = DEBOUNCE_MIN_MS,
        max = DEBOUNCE_MAX_MS
    )]
    InvalidDebounce { ms: u64 },

    #[error("policy path must not be empty")]
    EmptyPolicyPath,

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

warden_common::impl_context!();
