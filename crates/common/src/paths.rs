//! Default locations for the agent's IPC endpoint.

use std::path::PathBuf;

/// File name of the Unix domain socket.
pub const SOCKET_NAME: &str = "warden.sock";

/// Named pipe used on Windows hosts.
pub const PIPE_NAME: &str = r"\\.\pipe\warden";

/// Platform default IPC endpoint.
///
/// Unix: `$XDG_RUNTIME_DIR/warden.sock` when a runtime dir exists, otherwise
/// `/tmp/warden.sock`. Windows: [`PIPE_NAME`].
#[must_use]
pub fn default_endpoint() -> String {
    if cfg!(windows) {
        return PIPE_NAME.to_string();
    }
    runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
        .to_string_lossy()
        .into_owned()
}

fn runtime_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().and_then(|d| d.runtime_dir().map(PathBuf::from))
}
