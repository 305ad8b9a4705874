//! Maps decoded requests onto the watch supervisor.

use std::{path::PathBuf, sync::Arc};

use {
    tracing::{debug, warn},
    warden_protocol::{
        ApplyResponse, PingResponse, Request, Response, WatchSetResponse, WatchStatusBody,
        WatchStatusResponse, parse_request,
    },
    warden_watch::{SetOutcome, WatchStatus, WatchSupervisor},
};

/// Turns one request into one response. Never fails: every problem becomes an
/// `ok: false` response.
#[derive(Clone)]
pub struct Dispatcher {
    supervisor: Arc<WatchSupervisor>,
    version: String,
}

impl Dispatcher {
    pub fn new(supervisor: Arc<WatchSupervisor>) -> Self {
        Self {
            supervisor,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn supervisor(&self) -> &Arc<WatchSupervisor> {
        &self.supervisor
    }

    /// Decode and dispatch one newline-delimited request line.
    pub async fn handle_line(&self, line: &str) -> Response {
        match parse_request(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                debug!(error = %e, "rejecting malformed request");
                e.into()
            },
        }
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        debug!(kind = request.kind(), "dispatching request");
        match request {
            Request::WatchSet {
                policy_path,
                debounce_ms,
            } => Response::WatchSet(self.watch_set(policy_path, debounce_ms).await),
            Request::WatchStatus => Response::WatchStatus(WatchStatusResponse::Success(
                status_body(self.supervisor.status()),
            )),
            Request::Apply { policy_path } => {
                let response = match self.supervisor.apply_once(&PathBuf::from(policy_path)).await
                {
                    Ok(success) => ApplyResponse::Success {
                        changed: success.changed,
                        filter_count: success.filter_count,
                    },
                    Err(e) => ApplyResponse::Failure {
                        error: e.to_string(),
                    },
                };
                Response::Apply(response)
            },
            Request::Ping => Response::Ping(PingResponse::new(self.version.clone())),
        }
    }

    async fn watch_set(
        &self,
        policy_path: Option<String>,
        debounce_ms: Option<u64>,
    ) -> WatchSetResponse {
        let policy_path = policy_path.map(PathBuf::from);
        match self.supervisor.set(policy_path, debounce_ms).await {
            Ok(SetOutcome::Watching {
                policy_path,
                initial_apply,
            }) => WatchSetResponse::Watching {
                policy_path: policy_path.display().to_string(),
                initial_apply_success: initial_apply.is_ok(),
                warning: initial_apply.err().map(|e| e.message().to_string()),
            },
            Ok(SetOutcome::Disabled) => WatchSetResponse::Disabled,
            Err(e) => {
                warn!(error = %e, "watch-set rejected");
                WatchSetResponse::Failure {
                    error: e.to_string(),
                }
            },
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn status_body(status: WatchStatus) -> WatchStatusBody {
    WatchStatusBody {
        watching: status.watching,
        policy_path: status.policy_path.map(|p| p.display().to_string()),
        debounce_ms: status.debounce_ms,
        last_apply_time: status.last_apply_time,
        last_error: status.last_error,
        last_error_time: status.last_error_time,
        apply_count: status.apply_count,
        error_count: status.error_count,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        rstest::rstest,
        serde_json::{Value, json},
        warden_engine::{ApplyPipeline, MemoryEngine},
        warden_watch::ManualSource,
    };

    const POLICY: &str = r#"
[[filters]]
name = "block telnet"
action = "block"
direction = "outbound"
protocol = "tcp"
remote_port = 23
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        engine: Arc<MemoryEngine>,
        dispatcher: Dispatcher,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("policy.toml"), POLICY).unwrap();
            let engine = Arc::new(MemoryEngine::new());
            let supervisor = WatchSupervisor::new(
                ApplyPipeline::new(engine.clone()),
                Arc::new(ManualSource::new()),
            );
            Self {
                dir,
                engine,
                dispatcher: Dispatcher::new(supervisor),
            }
        }

        fn policy(&self) -> String {
            self.dir.path().join("policy.toml").display().to_string()
        }

        async fn call(&self, request: Value) -> Value {
            let response = self.dispatcher.handle_line(&request.to_string()).await;
            serde_json::to_value(response).unwrap()
        }
    }

    #[tokio::test]
    async fn ping_reports_version() {
        let fx = Fixture::new();
        let reply = fx.call(json!({ "type": "ping" })).await;
        assert_eq!(reply, json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }));
    }

    #[tokio::test]
    async fn watch_set_enables_and_applies() {
        let fx = Fixture::new();
        let reply = fx
            .call(json!({ "type": "watch-set", "policyPath": fx.policy(), "debounceMs": 250 }))
            .await;
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["watching"], true);
        assert_eq!(reply["initialApplySuccess"], true);
        assert!(reply.get("warning").is_none());
        assert_eq!(fx.engine.commits(), 1);

        let status = fx.call(json!({ "type": "watch-status" })).await;
        assert_eq!(status["watching"], true);
        assert_eq!(status["policyPath"], fx.policy());
        assert_eq!(status["debounceMs"], 250);
        assert_eq!(status["applyCount"], 1);
        assert_eq!(status["errorCount"], 0);

        fx.dispatcher.supervisor().shutdown().await;
    }

    #[tokio::test]
    async fn failed_initial_apply_is_a_warning() {
        let fx = Fixture::new();
        let missing = fx.dir.path().join("missing.toml").display().to_string();
        let reply = fx
            .call(json!({ "type": "watch-set", "policyPath": missing }))
            .await;
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["watching"], true);
        assert_eq!(reply["initialApplySuccess"], false);
        assert!(reply["warning"].as_str().is_some_and(|w| !w.is_empty()));

        let status = fx.call(json!({ "type": "watch-status" })).await;
        assert_eq!(status["errorCount"], 1);
        assert!(status.get("lastErrorTime").is_some());

        fx.dispatcher.supervisor().shutdown().await;
    }

    #[rstest]
    #[case(json!({ "type": "watch-set", "policyPath": "/p.toml", "debounceMs": 99 }))]
    #[case(json!({ "type": "watch-set", "policyPath": "/p.toml", "debounceMs": 30001 }))]
    #[case(json!({ "type": "watch-set", "policyPath": "" }))]
    #[tokio::test]
    async fn invalid_watch_set_is_rejected(#[case] request: Value) {
        let fx = Fixture::new();
        let reply = fx.call(request).await;
        assert_eq!(reply["ok"], false);
        assert!(reply["error"].is_string());

        let status = fx.call(json!({ "type": "watch-status" })).await;
        assert_eq!(status["watching"], false);
        assert_eq!(fx.engine.commits(), 0);
    }

    #[tokio::test]
    async fn watch_set_without_path_disables() {
        let fx = Fixture::new();
        fx.call(json!({ "type": "watch-set", "policyPath": fx.policy() }))
            .await;
        let reply = fx.call(json!({ "type": "watch-set" })).await;
        assert_eq!(reply, json!({ "ok": true, "watching": false }));

        let status = fx.call(json!({ "type": "watch-status" })).await;
        assert_eq!(status["watching"], false);
        assert!(status.get("policyPath").is_none());
        assert_eq!(status["applyCount"], 1);
    }

    #[tokio::test]
    async fn apply_reports_change_then_noop() {
        let fx = Fixture::new();
        let first = fx
            .call(json!({ "type": "apply", "policyPath": fx.policy() }))
            .await;
        assert_eq!(first, json!({ "ok": true, "changed": true, "filterCount": 1 }));
        let second = fx
            .call(json!({ "type": "apply", "policyPath": fx.policy() }))
            .await;
        assert_eq!(second, json!({ "ok": true, "changed": false, "filterCount": 1 }));

        let status = fx.call(json!({ "type": "watch-status" })).await;
        assert_eq!(status["applyCount"], 0);
    }

    #[tokio::test]
    async fn apply_failure_carries_the_error() {
        let fx = Fixture::new();
        let reply = fx
            .call(json!({ "type": "apply", "policyPath": "/nonexistent/policy.toml" }))
            .await;
        assert_eq!(reply["ok"], false);
        assert!(reply["error"].is_string());
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"type":"reboot"}"#)]
    #[case(r#"{"policyPath":"/p.toml"}"#)]
    #[tokio::test]
    async fn malformed_requests_get_an_error(#[case] line: &str) {
        let fx = Fixture::new();
        let response = fx.dispatcher.handle_line(line).await;
        assert!(!response.is_ok());
        let reply = serde_json::to_value(response).unwrap();
        assert_eq!(reply["ok"], false);
        assert!(reply["error"].is_string());
    }
}
