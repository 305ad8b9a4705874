//! Watch supervisor: configuration, worker lifecycle and status counters.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock, RwLockWriteGuard},
    time::Duration,
};

use {
    chrono::Utc,
    tokio::{
        sync::{Mutex, Notify},
        task::JoinHandle,
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    warden_engine::{ApplyPipeline, ApplySuccess, DomainError},
};

use crate::{
    debounce::Debouncer,
    error::Result,
    source::{ChangeEvent, ChangeSource, Subscription},
    status::{WatchConfig, WatchStatus},
};

/// Default delay between attempts to (re)establish a subscription.
pub const DEFAULT_RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(5);

/// Result of [`WatchSupervisor::set`].
#[derive(Debug)]
pub enum SetOutcome {
    Disabled,
    Watching {
        policy_path: PathBuf,
        /// Outcome of the immediate apply that follows enabling.
        initial_apply: std::result::Result<ApplySuccess, DomainError>,
    },
}

struct Worker {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Cancel the worker and wait for it. An in-flight apply runs to completion.
    async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                warn!(error = %e, "watch worker panicked");
            }
        }
    }
}

struct Active {
    config: WatchConfig,
    worker: Option<Worker>,
}

struct StatusCell {
    status: WatchStatus,
    /// Bumped on every reconfiguration; outcomes tagged with an older epoch are dropped.
    epoch: u64,
}

/// Owns the watch configuration and the apply gate.
///
/// Shared as `Arc<WatchSupervisor>` between the IPC dispatcher and the
/// workers it spawns. Call [`WatchSupervisor::shutdown`] before dropping the
/// last handle so the workers release theirs.
pub struct WatchSupervisor {
    pipeline: ApplyPipeline,
    source: Arc<dyn ChangeSource>,
    resubscribe_interval: Duration,
    /// Serialises `set` calls and owns the running worker.
    active: Mutex<Active>,
    status: RwLock<StatusCell>,
    apply_gate: Mutex<()>,
}

impl WatchSupervisor {
    pub fn new(pipeline: ApplyPipeline, source: Arc<dyn ChangeSource>) -> Arc<Self> {
        Self::with_resubscribe_interval(pipeline, source, DEFAULT_RESUBSCRIBE_INTERVAL)
    }

    pub fn with_resubscribe_interval(
        pipeline: ApplyPipeline,
        source: Arc<dyn ChangeSource>,
        resubscribe_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            source,
            resubscribe_interval,
            active: Mutex::new(Active {
                config: WatchConfig::default(),
                worker: None,
            }),
            status: RwLock::new(StatusCell {
                status: WatchStatus::default(),
                epoch: 0,
            }),
            apply_gate: Mutex::new(()),
        })
    }

    /// Snapshot of the current status. Never waits for an apply.
    pub fn status(&self) -> WatchStatus {
        self.status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .status
            .clone()
    }

    /// Replace the watch configuration.
    ///
    /// `None` disables watching. `debounce_ms` of `None` keeps the current
    /// interval. An invalid configuration is rejected before anything
    /// changes. Enabling starts a new worker and runs one immediate apply,
    /// whose failure is reported in the outcome rather than as an error.
    pub async fn set(
        self: &Arc<Self>,
        policy_path: Option<PathBuf>,
        debounce_ms: Option<u64>,
    ) -> Result<SetOutcome> {
        let mut active = self.active.lock().await;
        let debounce_ms = debounce_ms.unwrap_or(active.config.debounce_ms());
        let next = match policy_path {
            Some(path) => WatchConfig::watching(path, debounce_ms)?,
            None => WatchConfig::disabled(debounce_ms)?,
        };

        if let Some(worker) = active.worker.take() {
            worker.stop().await;
        }

        let Some(path) = next.policy_path().map(Path::to_path_buf) else {
            {
                let mut cell = self.write_status();
                cell.epoch += 1;
                cell.status.watching = false;
                cell.status.policy_path = None;
                cell.status.debounce_ms = debounce_ms;
            }
            active.config = next;
            info!("policy watch disabled");
            return Ok(SetOutcome::Disabled);
        };

        let reset = active.config.policy_path() != Some(path.as_path());
        let epoch = {
            let mut cell = self.write_status();
            cell.epoch += 1;
            if reset {
                cell.status.reset_counters();
            }
            cell.status.watching = true;
            cell.status.policy_path = Some(path.clone());
            cell.status.debounce_ms = debounce_ms;
            cell.epoch
        };
        let subscription = match self.source.subscribe(&path) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot watch policy file yet, worker will retry");
                None
            },
        };
        let worker = self.spawn_worker(path.clone(), next.debounce(), epoch, subscription);
        active.config = next;
        active.worker = Some(worker);
        info!(path = %path.display(), debounce_ms, counters_reset = reset, "policy watch enabled");

        let initial_apply = self.apply_and_record(&path, epoch).await;
        Ok(SetOutcome::Watching {
            policy_path: path,
            initial_apply,
        })
    }

    /// Apply `path` once through the apply gate. Watch state and counters are untouched.
    pub async fn apply_once(&self, path: &Path) -> std::result::Result<ApplySuccess, DomainError> {
        let outcome = self.gated_apply(path).await;
        log_outcome(path, &outcome);
        outcome
    }

    /// Stop watching and join the worker. Counters stay visible.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        if let Some(worker) = active.worker.take() {
            worker.stop().await;
        }
        active.config = active.config.to_disabled();
        let mut cell = self.write_status();
        cell.epoch += 1;
        cell.status.watching = false;
        cell.status.policy_path = None;
        debug!("watch supervisor shut down");
    }

    fn write_status(&self) -> RwLockWriteGuard<'_, StatusCell> {
        self.status.write().unwrap_or_else(|e| e.into_inner())
    }

    async fn gated_apply(&self, path: &Path) -> std::result::Result<ApplySuccess, DomainError> {
        let _gate = self.apply_gate.lock().await;
        self.pipeline.apply(path).await
    }

    async fn apply_and_record(
        &self,
        path: &Path,
        epoch: u64,
    ) -> std::result::Result<ApplySuccess, DomainError> {
        let outcome = self.gated_apply(path).await;
        let now = Utc::now();
        {
            let mut cell = self.write_status();
            if cell.epoch == epoch {
                cell.status.record(&outcome, now);
            } else {
                debug!(epoch, current = cell.epoch, "dropping outcome from a previous watch");
            }
        }
        log_outcome(path, &outcome);
        outcome
    }

    fn spawn_worker(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
        epoch: u64,
        subscription: Option<Subscription>,
    ) -> Worker {
        let cancel = CancellationToken::new();
        let trigger = Arc::new(Notify::new());

        let intake = tokio::spawn(run_intake(
            Arc::clone(&self.source),
            path.clone(),
            interval,
            self.resubscribe_interval,
            subscription,
            cancel.clone(),
            {
                let trigger = Arc::clone(&trigger);
                move || trigger.notify_one()
            },
        ));

        let applier = {
            let supervisor = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = trigger.notified() => {},
                    }
                    let _ = supervisor.apply_and_record(&path, epoch).await;
                }
            })
        };

        Worker {
            cancel,
            tasks: vec![intake, applier],
        }
    }
}

fn log_outcome(path: &Path, outcome: &std::result::Result<ApplySuccess, DomainError>) {
    match outcome {
        Ok(ok) => info!(
            path = %path.display(),
            changed = ok.changed,
            filters = ok.filter_count,
            "policy apply succeeded"
        ),
        Err(e) => warn!(
            path = %path.display(),
            code = %e.code(),
            error = %e,
            "policy apply failed"
        ),
    }
}

/// Event intake: feed the debouncer, call `on_fire` when a burst settles.
///
/// Starts from `initial` when the caller already subscribed. Otherwise, and
/// whenever the subscription closes, subscribes again every `resubscribe`
/// until cancelled.
pub(crate) async fn run_intake<F>(
    source: Arc<dyn ChangeSource>,
    path: PathBuf,
    interval: Duration,
    resubscribe: Duration,
    mut initial: Option<Subscription>,
    cancel: CancellationToken,
    on_fire: F,
) where
    F: Fn() + Send,
{
    let mut debouncer = Debouncer::new(interval);
    loop {
        let next = match initial.take() {
            Some(subscription) => Ok(subscription),
            None => source.subscribe(&path),
        };
        let mut subscription = match next {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    retry_ms = resubscribe.as_millis() as u64,
                    "cannot watch policy file, will retry"
                );
                if sleep_or_cancel(&cancel, resubscribe).await {
                    return;
                }
                continue;
            },
        };
        debug!(path = %path.display(), "policy file subscription established");

        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                () = cancel.cancelled() => {
                    debouncer.cancel();
                    return;
                },
                event = subscription.recv() => match event {
                    Some(ChangeEvent::Changed) => debouncer.on_event(Instant::now()),
                    Some(ChangeEvent::Error(e)) => {
                        warn!(path = %path.display(), error = %e, "policy watcher error");
                    },
                    None => {
                        warn!(path = %path.display(), "policy watcher closed, resubscribing");
                        break;
                    },
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if debouncer.poll(Instant::now()) {
                        debug!(path = %path.display(), "debounce window closed");
                        on_fire();
                    }
                },
            }
        }

        drop(subscription);
        if sleep_or_cancel(&cancel, resubscribe).await {
            return;
        }
    }
}

/// Returns `true` if cancelled before `duration` elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}
