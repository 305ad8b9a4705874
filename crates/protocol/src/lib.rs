//! Control channel protocol definitions.
//!
//! Newline-delimited JSON: each line is one object. Requests carry a `type`
//! discriminator; responses always carry `ok`.
//!
//! Requests:
//! - `watch-set`: enable watching at `policyPath`, or disable when it is null/absent
//! - `watch-status`: status snapshot
//! - `apply`: apply a policy file once
//! - `ping`: liveness
//!
//! Optional response fields are omitted when absent, never sent as `null` or `""`.

use {
    chrono::{DateTime, SecondsFormat, Utc},
    serde::{Deserialize, Serialize},
};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
/// Longest accepted request line, newline excluded.
pub const MAX_REQUEST_BYTES: usize = 65_536; // 64 KiB

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("request of {len} bytes exceeds the {max} byte limit", max = MAX_REQUEST_BYTES)]
    TooLarge { len: usize },
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    WatchSet {
        #[serde(rename = "policyPath", default, skip_serializing_if = "Option::is_none")]
        policy_path: Option<String>,
        #[serde(rename = "debounceMs", default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
    },
    WatchStatus,
    Apply {
        #[serde(rename = "policyPath")]
        policy_path: String,
    },
    Ping,
}

impl Request {
    /// Wire name of the request type, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WatchSet { .. } => "watch-set",
            Self::WatchStatus => "watch-status",
            Self::Apply { .. } => "apply",
            Self::Ping => "ping",
        }
    }
}

/// Parse one request line.
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    if line.len() > MAX_REQUEST_BYTES {
        return Err(ProtocolError::TooLarge { len: line.len() });
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Serialize a request or response as a single line, without the trailing newline.
pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ── watch-set ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "WatchSetWire")]
pub enum WatchSetResponse {
    /// Watching is on. `warning` carries the initial apply's error, if any.
    Watching {
        policy_path: String,
        initial_apply_success: bool,
        warning: Option<String>,
    },
    Disabled,
    Failure {
        error: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchSetWire {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    watching: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_apply_success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<WatchSetResponse> for WatchSetWire {
    fn from(response: WatchSetResponse) -> Self {
        let empty = Self {
            ok: true,
            watching: None,
            policy_path: None,
            initial_apply_success: None,
            warning: None,
            error: None,
        };
        match response {
            WatchSetResponse::Watching {
                policy_path,
                initial_apply_success,
                warning,
            } => Self {
                watching: Some(true),
                policy_path: Some(policy_path),
                initial_apply_success: Some(initial_apply_success),
                warning: non_empty(warning),
                ..empty
            },
            WatchSetResponse::Disabled => Self {
                watching: Some(false),
                ..empty
            },
            WatchSetResponse::Failure { error } => Self {
                ok: false,
                error: Some(error),
                ..empty
            },
        }
    }
}

// ── watch-status ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchStatusBody {
    pub watching: bool,
    pub policy_path: Option<String>,
    pub debounce_ms: u64,
    pub last_apply_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub apply_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "WatchStatusWire")]
pub enum WatchStatusResponse {
    Success(WatchStatusBody),
    Failure { error: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchStatusWire {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    watching: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debounce_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_apply_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    apply_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<WatchStatusResponse> for WatchStatusWire {
    fn from(response: WatchStatusResponse) -> Self {
        match response {
            WatchStatusResponse::Success(body) => {
                let last_error = non_empty(body.last_error);
                let last_error_time = last_error.as_ref().and(body.last_error_time);
                Self {
                    ok: true,
                    watching: Some(body.watching),
                    policy_path: if body.watching {
                        non_empty(body.policy_path)
                    } else {
                        None
                    },
                    debounce_ms: Some(body.debounce_ms),
                    last_apply_time: body.last_apply_time.map(timestamp),
                    last_error,
                    last_error_time: last_error_time.map(timestamp),
                    apply_count: Some(body.apply_count),
                    error_count: Some(body.error_count),
                    error: None,
                }
            },
            WatchStatusResponse::Failure { error } => Self {
                ok: false,
                watching: None,
                policy_path: None,
                debounce_ms: None,
                last_apply_time: None,
                last_error: None,
                last_error_time: None,
                apply_count: None,
                error_count: None,
                error: Some(error),
            },
        }
    }
}

// ── apply / ping ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "ApplyWire")]
pub enum ApplyResponse {
    Success { changed: bool, filter_count: usize },
    Failure { error: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyWire {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<ApplyResponse> for ApplyWire {
    fn from(response: ApplyResponse) -> Self {
        match response {
            ApplyResponse::Success {
                changed,
                filter_count,
            } => Self {
                ok: true,
                changed: Some(changed),
                filter_count: Some(filter_count),
                error: None,
            },
            ApplyResponse::Failure { error } => Self {
                ok: false,
                changed: None,
                filter_count: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingResponse {
    ok: bool,
    pub version: String,
}

impl PingResponse {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            ok: true,
            version: version.into(),
        }
    }
}

/// Failure that is not tied to a request type, e.g. an unparseable line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    ok: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}

/// Any response the agent writes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    WatchSet(WatchSetResponse),
    WatchStatus(WatchStatusResponse),
    Apply(ApplyResponse),
    Ping(PingResponse),
    Error(ErrorResponse),
}

impl Response {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        match self {
            Self::WatchSet(r) => !matches!(r, WatchSetResponse::Failure { .. }),
            Self::WatchStatus(r) => !matches!(r, WatchStatusResponse::Failure { .. }),
            Self::Apply(r) => !matches!(r, ApplyResponse::Failure { .. }),
            Self::Ping(_) => true,
            Self::Error(_) => false,
        }
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Self::Error(ErrorResponse::new(err.to_string()))
    }
}
