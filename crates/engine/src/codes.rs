//! Native result codes returned by the Win32 API and the filter engine.
//!
//! Values match `winerror.h` / `fwpmu.h`.

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_NOT_FOUND: u32 = 1168;
pub const RPC_S_SERVER_UNAVAILABLE: u32 = 1722;
pub const EPT_S_NOT_REGISTERED: u32 = 1753;

/// `HRESULT_FROM_WIN32(ERROR_ACCESS_DENIED)`.
pub const E_ACCESSDENIED: u32 = 0x8007_0005;
/// `HRESULT_FROM_WIN32(ERROR_INVALID_PARAMETER)`.
pub const E_INVALIDARG: u32 = 0x8007_0057;

// ── FWP_E_* ─────────────────────────────────────────────────────────────────

pub const FWP_E_CALLOUT_NOT_FOUND: u32 = 0x8032_0001;
pub const FWP_E_CONDITION_NOT_FOUND: u32 = 0x8032_0002;
pub const FWP_E_FILTER_NOT_FOUND: u32 = 0x8032_0003;
pub const FWP_E_LAYER_NOT_FOUND: u32 = 0x8032_0004;
pub const FWP_E_PROVIDER_NOT_FOUND: u32 = 0x8032_0005;
pub const FWP_E_PROVIDER_CONTEXT_NOT_FOUND: u32 = 0x8032_0006;
pub const FWP_E_SUBLAYER_NOT_FOUND: u32 = 0x8032_0007;
pub const FWP_E_NOT_FOUND: u32 = 0x8032_0008;
pub const FWP_E_ALREADY_EXISTS: u32 = 0x8032_0009;
pub const FWP_E_IN_USE: u32 = 0x8032_000A;
pub const FWP_E_DYNAMIC_SESSION_IN_PROGRESS: u32 = 0x8032_000B;
pub const FWP_E_WRONG_SESSION: u32 = 0x8032_000C;
pub const FWP_E_NO_TXN_IN_PROGRESS: u32 = 0x8032_000D;
pub const FWP_E_TXN_IN_PROGRESS: u32 = 0x8032_000E;
pub const FWP_E_TXN_ABORTED: u32 = 0x8032_000F;
pub const FWP_E_SESSION_ABORTED: u32 = 0x8032_0010;
pub const FWP_E_TIMEOUT: u32 = 0x8032_0012;
pub const FWP_E_BUILTIN_OBJECT: u32 = 0x8032_0017;
pub const FWP_E_INVALID_WEIGHT: u32 = 0x8032_0025;
pub const FWP_E_INVALID_PARAMETER: u32 = 0x8032_0035;

/// Inclusive bounds of the facility reserved for filter engine errors.
pub const FWP_E_RANGE: std::ops::RangeInclusive<u32> = 0x8032_0001..=0x8032_00FF;
