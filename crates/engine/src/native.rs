//! Boundary to the kernel filter engine.
//!
//! Calls are blocking and return raw native result codes; the apply pipeline
//! is the only caller and translates every failure before it escapes.

use crate::policy::{FilterSpec, ProviderSpec, SublayerSpec};

/// Opaque handle to an open engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Raw result of a native call: `Err` carries a non-zero result code.
pub type NativeResult<T = ()> = Result<T, u32>;

/// One step of an apply, used to build error context and for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    OpenSession,
    BeginTransaction,
    AddProvider,
    AddSublayer,
    AddFilters,
    CommitTransaction,
}

impl Step {
    /// Context prefix attached to translated errors from this step.
    #[must_use]
    pub fn context(self) -> &'static str {
        match self {
            Self::OpenSession => "opening WFP engine",
            Self::BeginTransaction => "beginning transaction",
            Self::AddProvider => "adding provider",
            Self::AddSublayer => "adding sublayer",
            Self::AddFilters => "adding filter",
            Self::CommitTransaction => "committing transaction",
        }
    }
}

/// Provider / sublayer / filter CRUD with session and transaction semantics.
///
/// The `ensure_*` calls are upserts. [`NativeEngine::replace_filters`]
/// replaces every filter in the sublayer with the given set. Mutations only
/// become visible to other sessions once the transaction commits.
pub trait NativeEngine: Send + Sync {
    fn open_session(&self) -> NativeResult<SessionId>;

    /// Release the session. Aborts any transaction still open on it.
    fn close_session(&self, session: SessionId);

    fn begin_transaction(&self, session: SessionId) -> NativeResult;

    fn commit_transaction(&self, session: SessionId) -> NativeResult;

    fn abort_transaction(&self, session: SessionId) -> NativeResult;

    fn ensure_provider(&self, session: SessionId, provider: &ProviderSpec) -> NativeResult;

    fn ensure_sublayer(
        &self,
        session: SessionId,
        provider: &ProviderSpec,
        sublayer: &SublayerSpec,
    ) -> NativeResult;

    fn replace_filters(
        &self,
        session: SessionId,
        sublayer: &SublayerSpec,
        filters: &[FilterSpec],
    ) -> NativeResult;
}
