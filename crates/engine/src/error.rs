//! Domain error taxonomy and the native result-code translator.
//!
//! Raw codes from the Win32 API and the filter engine never leave this crate
//! untranslated: every failure is classified into one of four [`ErrorCode`]s
//! with a human-readable message, optionally prefixed by the failing step.

use std::{borrow::Cow, fmt};

use crate::codes::*;

/// Closed set of error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AccessDenied,
    InvalidArgument,
    NotFound,
    /// Any filter engine condition not otherwise classified.
    WfpError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessDenied => write!(f, "AccessDenied"),
            Self::InvalidArgument => write!(f, "InvalidArgument"),
            Self::NotFound => write!(f, "NotFound"),
            Self::WfpError => write!(f, "WfpError"),
        }
    }
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DomainError {
    code: ErrorCode,
    message: String,
    native_code: Option<u32>,
}

impl DomainError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            native_code: None,
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The raw native code this error was translated from, if any.
    #[must_use]
    pub fn native_code(&self) -> Option<u32> {
        self.native_code
    }

    /// Prefix the message with `"<context>: "`. Empty contexts are ignored.
    #[must_use]
    pub fn with_context(mut self, context: &str) -> Self {
        self.message = prefixed(Some(context), &self.message);
        self
    }
}

/// Known codes with their classification and base message.
///
/// Order matters only for readability; lookups are by exact match.
pub const KNOWN_CODES: &[(u32, ErrorCode, &str)] = &[
    // Win32
    (
        ERROR_ACCESS_DENIED,
        ErrorCode::AccessDenied,
        "Access denied. Try running as administrator.",
    ),
    (
        E_ACCESSDENIED,
        ErrorCode::AccessDenied,
        "Access denied. Try running as administrator.",
    ),
    (
        ERROR_INVALID_PARAMETER,
        ErrorCode::InvalidArgument,
        "Invalid parameter: the filter engine rejected an argument",
    ),
    (
        E_INVALIDARG,
        ErrorCode::InvalidArgument,
        "Invalid parameter: the filter engine rejected an argument",
    ),
    (ERROR_FILE_NOT_FOUND, ErrorCode::NotFound, "File not found"),
    (ERROR_NOT_FOUND, ErrorCode::NotFound, "Element not found"),
    // Filter engine, missing objects
    (FWP_E_CALLOUT_NOT_FOUND, ErrorCode::NotFound, "Callout not found"),
    (FWP_E_FILTER_NOT_FOUND, ErrorCode::NotFound, "Filter not found"),
    (FWP_E_LAYER_NOT_FOUND, ErrorCode::NotFound, "Layer not found"),
    (FWP_E_PROVIDER_NOT_FOUND, ErrorCode::NotFound, "Provider not found"),
    (FWP_E_SUBLAYER_NOT_FOUND, ErrorCode::NotFound, "Sublayer not found"),
    (
        FWP_E_NOT_FOUND,
        ErrorCode::NotFound,
        "Object not found in the filter engine",
    ),
    // Filter engine, other conditions
    (
        FWP_E_ALREADY_EXISTS,
        ErrorCode::WfpError,
        "Object already exists in the filter engine",
    ),
    (
        FWP_E_IN_USE,
        ErrorCode::WfpError,
        "Object is in use and cannot be deleted",
    ),
    (
        FWP_E_DYNAMIC_SESSION_IN_PROGRESS,
        ErrorCode::WfpError,
        "Operation is not allowed inside a dynamic session",
    ),
    (
        FWP_E_NO_TXN_IN_PROGRESS,
        ErrorCode::WfpError,
        "No transaction is in progress",
    ),
    (
        FWP_E_TXN_IN_PROGRESS,
        ErrorCode::WfpError,
        "A transaction is already in progress",
    ),
    (FWP_E_TXN_ABORTED, ErrorCode::WfpError, "Transaction was aborted"),
    (
        FWP_E_SESSION_ABORTED,
        ErrorCode::WfpError,
        "Filter engine session was aborted",
    ),
    (
        FWP_E_TIMEOUT,
        ErrorCode::WfpError,
        "Timed out waiting for the filter engine lock",
    ),
    (
        FWP_E_BUILTIN_OBJECT,
        ErrorCode::WfpError,
        "Built-in filter engine objects cannot be modified",
    ),
    (FWP_E_INVALID_WEIGHT, ErrorCode::WfpError, "Invalid filter weight"),
    (
        FWP_E_INVALID_PARAMETER,
        ErrorCode::WfpError,
        "Invalid parameter passed to the filter engine",
    ),
    // Service availability
    (
        RPC_S_SERVER_UNAVAILABLE,
        ErrorCode::WfpError,
        "Base Filtering Engine service is not running",
    ),
    (
        EPT_S_NOT_REGISTERED,
        ErrorCode::WfpError,
        "Base Filtering Engine service is not running",
    ),
];

/// `true` iff `code` is the success code.
#[must_use]
pub fn is_success(code: u32) -> bool {
    code == ERROR_SUCCESS
}

/// Translate a native result code. Returns `None` for success.
#[must_use]
pub fn translate(code: u32, context: Option<&str>) -> Option<DomainError> {
    if is_success(code) {
        return None;
    }
    let (kind, base) = classify(code);
    Some(DomainError {
        code: kind,
        message: prefixed(context, &base),
        native_code: Some(code),
    })
}

/// `Ok(())` for success, the translated error otherwise.
pub fn check(code: u32, context: Option<&str>) -> Result<(), DomainError> {
    match translate(code, context) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Build the error for a code the caller already knows to be a failure.
///
/// # Panics
///
/// Panics when `code` is the success code. Asking for a failure from a
/// successful call is a programming error, not a recoverable condition.
#[track_caller]
#[must_use]
pub fn to_failed(code: u32, context: Option<&str>) -> DomainError {
    match translate(code, context) {
        Some(err) => err,
        None => panic!("to_failed called with success code {code:#010X}"),
    }
}

/// [`to_failed`] wrapped in `Err`, for call sites returning `Result<T, _>`.
///
/// # Panics
///
/// Panics when `code` is the success code.
#[track_caller]
pub fn to_failed_result<T>(code: u32, context: Option<&str>) -> Result<T, DomainError> {
    Err(to_failed(code, context))
}

fn classify(code: u32) -> (ErrorCode, Cow<'static, str>) {
    if let Some((_, kind, message)) = KNOWN_CODES.iter().find(|(c, ..)| *c == code) {
        return (*kind, Cow::Borrowed(message));
    }
    if FWP_E_RANGE.contains(&code) {
        return (
            ErrorCode::WfpError,
            Cow::Owned(format!("Filter engine error {}", hex(code))),
        );
    }
    (
        ErrorCode::WfpError,
        Cow::Owned(format!("Unknown error {}", hex(code))),
    )
}

/// `0x` followed by eight uppercase hex digits.
fn hex(code: u32) -> String {
    format!("0x{code:08X}")
}

fn prefixed(context: Option<&str>, message: &str) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => format!("{ctx}: {message}"),
        _ => message.to_string(),
    }
}
