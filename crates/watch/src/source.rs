//! Filesystem change sources.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    notify_debouncer_full::notify::{
        self, Event, EventKind, RecursiveMode, Watcher, recommended_watcher,
    },
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::error::{Context, Error, Result};

/// A change notification for the subscribed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Changed,
    /// The underlying watcher reported an error. The subscription stays open.
    Error(String),
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    _guard: Box<dyn Send>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>, guard: impl Send + 'static) -> Self {
        Self {
            rx,
            _guard: Box::new(guard),
        }
    }

    /// Next event, or `None` once the source has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Produces change events for a single file.
pub trait ChangeSource: Send + Sync {
    fn subscribe(&self, path: &Path) -> Result<Subscription>;
}

/// [`ChangeSource`] backed by the platform's native file watcher.
///
/// Watches the parent directory non-recursively and keeps only events that
/// touch the file's name, so editors that save via rename are still seen.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifySource;

impl ChangeSource for NotifySource {
    fn subscribe(&self, path: &Path) -> Result<Subscription> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("{} has no file name", path.display()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_relevant(&event.kind) {
                    return;
                }
                if event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    debug!(kind = ?event.kind, "policy file event");
                    let _ = tx.send(ChangeEvent::Changed);
                }
            },
            Err(e) => {
                let _ = tx.send(ChangeEvent::Error(e.to_string()));
            },
        })
        .context("creating filesystem watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| Error::Watch {
                path: dir.clone(),
                source,
            })?;
        info!(dir = %dir.display(), "watching policy directory");

        Ok(Subscription::new(rx, watcher))
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Hand-driven [`ChangeSource`] for tests and embedding.
#[derive(Debug, Default)]
pub struct ManualSource {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    failures_left: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl ManualSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a change event to every live subscription.
    pub fn emit(&self) {
        self.send(ChangeEvent::Changed);
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        self.send(ChangeEvent::Error(message.into()));
    }

    /// Make the next `n` calls to `subscribe` fail.
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Total number of `subscribe` calls, failed ones included.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of subscriptions that have not been dropped.
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }

    fn send(&self, event: ChangeEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl ChangeSource for ManualSource {
    fn subscribe(&self, path: &Path) -> Result<Subscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::message(format!(
                "cannot watch {}: source unavailable",
                path.display()
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Ok(Subscription::new(rx, ()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::time::Duration};

    #[tokio::test]
    async fn manual_source_delivers_and_fails_on_demand() {
        let source = ManualSource::new();
        source.fail_next_subscriptions(1);
        assert!(source.subscribe(Path::new("p.toml")).is_err());

        let mut sub = source.subscribe(Path::new("p.toml")).unwrap();
        source.emit();
        source.emit_error("boom");
        assert_eq!(sub.recv().await, Some(ChangeEvent::Changed));
        assert_eq!(sub.recv().await, Some(ChangeEvent::Error("boom".into())));
        assert_eq!(source.subscribe_count(), 2);

        drop(sub);
        assert_eq!(source.live_subscriptions(), 0);
    }

    #[test]
    fn missing_directory_fails_to_subscribe() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nope").join("policy.toml");
        let err = NotifySource.subscribe(&path).unwrap_err();
        assert!(matches!(err, Error::Watch { .. }), "got {err}");
    }

    #[tokio::test]
    async fn notify_source_sees_writes_to_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("policy.toml");
        std::fs::write(&path, "").unwrap();

        let mut sub = NotifySource.subscribe(&path).unwrap();
        std::fs::write(&path, "[[filters]]\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), sub.recv())
            .await
            .expect("timed out waiting for watcher event")
            .expect("subscription closed");
        assert_eq!(event, ChangeEvent::Changed);
    }

    #[tokio::test]
    async fn notify_source_ignores_sibling_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("policy.toml");
        std::fs::write(&path, "").unwrap();

        let mut sub = NotifySource.subscribe(&path).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await;
        assert!(result.is_err(), "expected no event for a sibling file");
    }
}
