//! In-process filter engine.
//!
//! Keeps providers, sublayers and filters in memory with the same session and
//! transaction rules as the kernel engine: writes are staged per session and
//! only published on commit. Used on hosts without a native backend and as the
//! engine behind the test suites, which also rely on its fault injection and
//! commit hold.

use std::{
    collections::HashMap,
    sync::{Condvar, Mutex, MutexGuard},
};

use {tracing::debug, uuid::Uuid};

use crate::{
    codes::{
        FWP_E_NO_TXN_IN_PROGRESS, FWP_E_PROVIDER_NOT_FOUND, FWP_E_SUBLAYER_NOT_FOUND,
        FWP_E_TXN_IN_PROGRESS, FWP_E_WRONG_SESSION,
    },
    native::{NativeEngine, NativeResult, SessionId, Step},
    policy::{FilterSpec, ProviderSpec, SublayerSpec},
};

#[derive(Debug, Clone, Default)]
struct EngineState {
    providers: HashMap<Uuid, ProviderSpec>,
    sublayers: HashMap<Uuid, (Uuid, SublayerSpec)>,
    filters: HashMap<Uuid, Vec<FilterSpec>>,
}

#[derive(Debug, Default)]
struct Inner {
    committed: EngineState,
    /// Open sessions and their staged transaction, if one is in progress.
    sessions: HashMap<SessionId, Option<EngineState>>,
    next_session: u64,
    max_open_sessions: usize,
    commits: u64,
    aborts: u64,
    faults: HashMap<Step, u32>,
    hold_commits: bool,
    waiting_commits: usize,
}

/// Thread-safe in-memory [`NativeEngine`].
#[derive(Debug, Default)]
pub struct MemoryEngine {
    inner: Mutex<Inner>,
    released: Condvar,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every future call at `step` fail with `code` until cleared.
    pub fn fail_on(&self, step: Step, code: u32) {
        self.lock().faults.insert(step, code);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Block commits until [`MemoryEngine::release_commits`] is called.
    pub fn hold_commits(&self) {
        self.lock().hold_commits = true;
    }

    pub fn release_commits(&self) {
        self.lock().hold_commits = false;
        self.released.notify_all();
    }

    /// Number of commits currently parked by [`MemoryEngine::hold_commits`].
    #[must_use]
    pub fn waiting_commits(&self) -> usize {
        self.lock().waiting_commits
    }

    #[must_use]
    pub fn commits(&self) -> u64 {
        self.lock().commits
    }

    #[must_use]
    pub fn aborts(&self) -> u64 {
        self.lock().aborts
    }

    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Highest number of sessions that were open at the same time.
    #[must_use]
    pub fn max_open_sessions(&self) -> usize {
        self.lock().max_open_sessions
    }

    #[must_use]
    pub fn provider(&self, key: &Uuid) -> Option<ProviderSpec> {
        self.lock().committed.providers.get(key).cloned()
    }

    #[must_use]
    pub fn sublayer(&self, key: &Uuid) -> Option<SublayerSpec> {
        self.lock()
            .committed
            .sublayers
            .get(key)
            .map(|(_, sublayer)| sublayer.clone())
    }

    /// Committed filters in a sublayer.
    #[must_use]
    pub fn filters(&self, sublayer: &Uuid) -> Vec<FilterSpec> {
        self.lock()
            .committed
            .filters
            .get(sublayer)
            .cloned()
            .unwrap_or_default()
    }

    fn fault(inner: &Inner, step: Step) -> NativeResult {
        match inner.faults.get(&step) {
            Some(code) => Err(*code),
            None => Ok(()),
        }
    }

    /// Run `f` against the staged state of `session`'s open transaction.
    fn staged<F>(&self, session: SessionId, step: Step, f: F) -> NativeResult
    where
        F: FnOnce(&mut EngineState) -> NativeResult,
    {
        let mut inner = self.lock();
        Self::fault(&inner, step)?;
        match inner.sessions.get_mut(&session) {
            None => Err(FWP_E_WRONG_SESSION),
            Some(None) => Err(FWP_E_NO_TXN_IN_PROGRESS),
            Some(Some(staged)) => f(staged),
        }
    }
}

impl NativeEngine for MemoryEngine {
    fn open_session(&self) -> NativeResult<SessionId> {
        let mut inner = self.lock();
        Self::fault(&inner, Step::OpenSession)?;
        inner.next_session += 1;
        let id = SessionId(inner.next_session);
        inner.sessions.insert(id, None);
        inner.max_open_sessions = inner.max_open_sessions.max(inner.sessions.len());
        debug!(session = id.0, "memory engine: session opened");
        Ok(id)
    }

    fn close_session(&self, session: SessionId) {
        let mut inner = self.lock();
        if let Some(Some(_)) = inner.sessions.remove(&session) {
            inner.aborts += 1;
        }
        debug!(session = session.0, "memory engine: session closed");
    }

    fn begin_transaction(&self, session: SessionId) -> NativeResult {
        let mut inner = self.lock();
        Self::fault(&inner, Step::BeginTransaction)?;
        let committed = inner.committed.clone();
        match inner.sessions.get_mut(&session) {
            None => Err(FWP_E_WRONG_SESSION),
            Some(Some(_)) => Err(FWP_E_TXN_IN_PROGRESS),
            Some(slot) => {
                *slot = Some(committed);
                Ok(())
            },
        }
    }

    fn commit_transaction(&self, session: SessionId) -> NativeResult {
        let mut inner = self.lock();
        if inner.hold_commits {
            inner.waiting_commits += 1;
            while inner.hold_commits {
                inner = self
                    .released
                    .wait(inner)
                    .unwrap_or_else(|e| e.into_inner());
            }
            inner.waiting_commits -= 1;
        }
        Self::fault(&inner, Step::CommitTransaction)?;
        let staged = inner
            .sessions
            .get_mut(&session)
            .ok_or(FWP_E_WRONG_SESSION)?
            .take()
            .ok_or(FWP_E_NO_TXN_IN_PROGRESS)?;
        inner.committed = staged;
        inner.commits += 1;
        Ok(())
    }

    fn abort_transaction(&self, session: SessionId) -> NativeResult {
        let mut inner = self.lock();
        let slot = inner
            .sessions
            .get_mut(&session)
            .ok_or(FWP_E_WRONG_SESSION)?;
        slot.take().ok_or(FWP_E_NO_TXN_IN_PROGRESS)?;
        inner.aborts += 1;
        Ok(())
    }

    fn ensure_provider(&self, session: SessionId, provider: &ProviderSpec) -> NativeResult {
        self.staged(session, Step::AddProvider, |state| {
            state.providers.insert(provider.key, provider.clone());
            Ok(())
        })
    }

    fn ensure_sublayer(
        &self,
        session: SessionId,
        provider: &ProviderSpec,
        sublayer: &SublayerSpec,
    ) -> NativeResult {
        self.staged(session, Step::AddSublayer, |state| {
            if !state.providers.contains_key(&provider.key) {
                return Err(FWP_E_PROVIDER_NOT_FOUND);
            }
            state
                .sublayers
                .insert(sublayer.key, (provider.key, sublayer.clone()));
            Ok(())
        })
    }

    fn replace_filters(
        &self,
        session: SessionId,
        sublayer: &SublayerSpec,
        filters: &[FilterSpec],
    ) -> NativeResult {
        self.staged(session, Step::AddFilters, |state| {
            if !state.sublayers.contains_key(&sublayer.key) {
                return Err(FWP_E_SUBLAYER_NOT_FOUND);
            }
            state.filters.insert(sublayer.key, filters.to_vec());
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{
            codes::FWP_E_ALREADY_EXISTS,
            policy::{Policy, PolicyFormat},
        },
    };

    fn one_filter() -> Vec<FilterSpec> {
        let json = r#"{"filters":[{"name":"f","action":"block","direction":"inbound"}]}"#;
        Policy::parse(json, PolicyFormat::Json)
            .unwrap()
            .filters
    }

    #[test]
    fn writes_are_invisible_until_commit() {
        let engine = MemoryEngine::new();
        let provider = ProviderSpec::default();
        let sublayer = SublayerSpec::default();

        let s = engine.open_session().unwrap();
        engine.begin_transaction(s).unwrap();
        engine.ensure_provider(s, &provider).unwrap();
        engine.ensure_sublayer(s, &provider, &sublayer).unwrap();
        engine.replace_filters(s, &sublayer, &one_filter()).unwrap();
        assert!(engine.filters(&sublayer.key).is_empty());

        engine.commit_transaction(s).unwrap();
        assert_eq!(engine.filters(&sublayer.key).len(), 1);
        assert_eq!(engine.commits(), 1);
        engine.close_session(s);
        assert_eq!(engine.open_sessions(), 0);
    }

    #[test]
    fn abort_discards_staged_writes() {
        let engine = MemoryEngine::new();
        let provider = ProviderSpec::default();

        let s = engine.open_session().unwrap();
        engine.begin_transaction(s).unwrap();
        engine.ensure_provider(s, &provider).unwrap();
        engine.abort_transaction(s).unwrap();
        engine.close_session(s);

        assert!(engine.provider(&provider.key).is_none());
        assert_eq!(engine.aborts(), 1);
    }

    #[test]
    fn mutations_require_a_transaction() {
        let engine = MemoryEngine::new();
        let s = engine.open_session().unwrap();
        assert_eq!(
            engine.ensure_provider(s, &ProviderSpec::default()),
            Err(FWP_E_NO_TXN_IN_PROGRESS)
        );
        engine.begin_transaction(s).unwrap();
        assert_eq!(engine.begin_transaction(s), Err(FWP_E_TXN_IN_PROGRESS));
    }

    #[test]
    fn sublayer_requires_provider() {
        let engine = MemoryEngine::new();
        let s = engine.open_session().unwrap();
        engine.begin_transaction(s).unwrap();
        assert_eq!(
            engine.ensure_sublayer(s, &ProviderSpec::default(), &SublayerSpec::default()),
            Err(FWP_E_PROVIDER_NOT_FOUND)
        );
    }

    #[test]
    fn injected_fault_fails_the_step() {
        let engine = MemoryEngine::new();
        engine.fail_on(Step::AddProvider, FWP_E_ALREADY_EXISTS);
        let s = engine.open_session().unwrap();
        engine.begin_transaction(s).unwrap();
        assert_eq!(
            engine.ensure_provider(s, &ProviderSpec::default()),
            Err(FWP_E_ALREADY_EXISTS)
        );
        engine.clear_faults();
        assert!(engine.ensure_provider(s, &ProviderSpec::default()).is_ok());
    }

    #[test]
    fn closing_with_open_transaction_counts_as_abort() {
        let engine = MemoryEngine::new();
        let s = engine.open_session().unwrap();
        engine.begin_transaction(s).unwrap();
        engine.close_session(s);
        assert_eq!(engine.aborts(), 1);
        assert_eq!(engine.begin_transaction(s), Err(FWP_E_WRONG_SESSION));
    }
}
