//! Apply pipeline: policy file → native engine, all-or-nothing.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    error::{DomainError, ErrorCode, to_failed},
    native::{NativeEngine, NativeResult, SessionId, Step},
    policy::Policy,
};

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySuccess {
    /// `false` when the policy matched the last installed one and the engine
    /// was left untouched.
    pub changed: bool,
    pub filter_count: usize,
    pub fingerprint: String,
}

/// Applies policy files to a [`NativeEngine`].
///
/// Cheap to clone; clones share the engine and the engine gate, so at most
/// one native apply sequence runs per engine at any time.
#[derive(Clone)]
pub struct ApplyPipeline {
    engine: Arc<dyn NativeEngine>,
    /// Engine gate. Holds the fingerprint of the last installed policy.
    installed: Arc<Mutex<Option<String>>>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ApplyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyPipeline")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ApplyPipeline {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            engine,
            installed: Arc::new(Mutex::new(None)),
            timeout: None,
        }
    }

    /// Bound how long a caller waits for one apply. `None` waits forever.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forget the installed fingerprint so the next apply always reaches the engine.
    pub fn invalidate(&self) {
        *self.installed.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Apply the policy at `path`.
    ///
    /// The blocking work runs on the blocking pool. On timeout the caller gets
    /// a `WfpError`; the work itself keeps the engine gate until it finishes,
    /// so a later apply can never overlap it.
    pub async fn apply(&self, path: &Path) -> Result<ApplySuccess, DomainError> {
        let pipeline = self.clone();
        let owned: PathBuf = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || pipeline.apply_blocking(&owned));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(path = %path.display(), timeout = ?limit, "policy apply timed out");
                    return Err(DomainError::new(
                        ErrorCode::WfpError,
                        format!("applying policy: timed out after {limit:?}"),
                    ));
                },
            },
            None => task.await,
        };

        joined.unwrap_or_else(|e| {
            Err(DomainError::new(
                ErrorCode::WfpError,
                format!("applying policy: apply task failed: {e}"),
            ))
        })
    }

    /// Synchronous form of [`ApplyPipeline::apply`], without the timeout.
    pub fn apply_blocking(&self, path: &Path) -> Result<ApplySuccess, DomainError> {
        let policy = Policy::load(path)?;
        let fingerprint = policy.fingerprint()?;
        let filter_count = policy.filters.len();

        let mut installed = self.installed.lock().unwrap_or_else(|e| e.into_inner());
        if installed.as_deref() == Some(fingerprint.as_str()) {
            debug!(path = %path.display(), "policy unchanged, skipping engine update");
            return Ok(ApplySuccess {
                changed: false,
                filter_count,
                fingerprint,
            });
        }

        install(self.engine.as_ref(), &policy)?;
        *installed = Some(fingerprint.clone());
        info!(path = %path.display(), filters = filter_count, "policy installed");

        Ok(ApplySuccess {
            changed: true,
            filter_count,
            fingerprint,
        })
    }
}

/// Run the native sequence inside one transaction.
fn install(engine: &dyn NativeEngine, policy: &Policy) -> Result<(), DomainError> {
    let mut session = Session::open(engine)?;
    session.begin()?;
    session.step(Step::AddProvider, |s| {
        engine.ensure_provider(s, &policy.provider)
    })?;
    session.step(Step::AddSublayer, |s| {
        engine.ensure_sublayer(s, &policy.provider, &policy.sublayer)
    })?;
    session.step(Step::AddFilters, |s| {
        engine.replace_filters(s, &policy.sublayer, &policy.filters)
    })?;
    session.commit()
}

/// Session guard: aborts an open transaction and closes the session on drop.
struct Session<'a> {
    engine: &'a dyn NativeEngine,
    id: SessionId,
    in_transaction: bool,
}

impl<'a> Session<'a> {
    fn open(engine: &'a dyn NativeEngine) -> Result<Self, DomainError> {
        let id = engine
            .open_session()
            .map_err(|code| to_failed(code, Some(Step::OpenSession.context())))?;
        Ok(Self {
            engine,
            id,
            in_transaction: false,
        })
    }

    fn step<F>(&self, step: Step, f: F) -> Result<(), DomainError>
    where
        F: FnOnce(SessionId) -> NativeResult,
    {
        f(self.id).map_err(|code| to_failed(code, Some(step.context())))
    }

    fn begin(&mut self) -> Result<(), DomainError> {
        let engine = self.engine;
        self.step(Step::BeginTransaction, |s| engine.begin_transaction(s))?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DomainError> {
        let engine = self.engine;
        self.step(Step::CommitTransaction, |s| engine.commit_transaction(s))?;
        self.in_transaction = false;
        Ok(())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.in_transaction
            && let Err(code) = self.engine.abort_transaction(self.id)
        {
            debug!(code = format_args!("{code:#010X}"), "transaction abort reported an error");
        }
        self.engine.close_session(self.id);
    }
}
