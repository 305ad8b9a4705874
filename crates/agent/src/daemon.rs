//! Agent assembly: engine, apply pipeline, watch supervisor and control channel.

use std::sync::Arc;

use {
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    warden_config::{MEMORY_BACKEND, WardenConfig},
    warden_engine::{ApplyPipeline, MemoryEngine, NativeEngine},
    warden_watch::{ChangeSource, NotifySource, SetOutcome, WatchSupervisor},
};

use crate::{
    dispatch::Dispatcher,
    error::{Error, Result},
    server,
};

/// Instantiate the configured engine backend.
pub fn build_engine(config: &WardenConfig) -> Result<Arc<dyn NativeEngine>> {
    match config.engine.backend.as_str() {
        MEMORY_BACKEND => Ok(Arc::new(MemoryEngine::new())),
        other => Err(Error::message(format!("unknown engine backend \"{other}\""))),
    }
}

/// A fully wired agent, ready to [`run`](Agent::run).
pub struct Agent {
    config: WardenConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Agent {
    /// Build an agent that watches the filesystem with the native watcher.
    pub fn from_config(config: WardenConfig) -> Result<Self> {
        Self::with_source(config, Arc::new(NotifySource))
    }

    pub fn with_source(config: WardenConfig, source: Arc<dyn ChangeSource>) -> Result<Self> {
        let engine = build_engine(&config)?;
        Ok(Self::with_engine(config, engine, source))
    }

    pub fn with_engine(
        config: WardenConfig,
        engine: Arc<dyn NativeEngine>,
        source: Arc<dyn ChangeSource>,
    ) -> Self {
        let pipeline = ApplyPipeline::new(engine).with_timeout(config.apply_timeout());
        let supervisor =
            WatchSupervisor::with_resubscribe_interval(pipeline, source, config.resubscribe_interval());
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(supervisor)),
        }
    }

    pub fn supervisor(&self) -> &Arc<WatchSupervisor> {
        self.dispatcher.supervisor()
    }

    /// Start watching the configured policy (if any) and serve the control
    /// channel until `shutdown` fires. The watcher is stopped before returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let endpoint = self.config.endpoint();
        if let Some(path) = self.config.watch.policy_path.clone() {
            let outcome = self
                .supervisor()
                .set(Some(path), Some(self.config.watch.debounce_ms))
                .await?;
            if let SetOutcome::Watching {
                policy_path,
                initial_apply: Err(e),
            } = outcome
            {
                warn!(path = %policy_path.display(), error = %e, "initial policy apply failed; still watching");
            }
        }

        info!(endpoint, backend = %self.config.engine.backend, "agent started");
        let served = server::listen(&endpoint, Arc::clone(&self.dispatcher), shutdown).await;
        self.supervisor().shutdown().await;
        info!("agent stopped");
        served
    }
}
