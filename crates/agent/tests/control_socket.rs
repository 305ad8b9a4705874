//! End-to-end tests for the agent's Unix control socket.
#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    serde_json::Value,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    warden_agent::{Agent, client},
    warden_config::WardenConfig,
    warden_engine::MemoryEngine,
    warden_protocol::Request,
    warden_watch::ManualSource,
};

const POLICY: &str = r#"
[[filters]]
name = "block smb"
action = "block"
direction = "inbound"
protocol = "tcp"
local_port = 445
"#;

struct Running {
    _dir: tempfile::TempDir,
    endpoint: String,
    policy: PathBuf,
    engine: Arc<MemoryEngine>,
    source: Arc<ManualSource>,
    shutdown: CancellationToken,
    task: JoinHandle<warden_agent::Result<()>>,
}

/// Start an agent on a fresh socket, optionally watching the policy from startup.
async fn start(watch_at_startup: bool) -> Running {
    let dir = tempfile::tempdir().unwrap();
    let policy = dir.path().join("policy.toml");
    std::fs::write(&policy, POLICY).unwrap();
    let endpoint = dir.path().join("warden.sock").display().to_string();

    let mut config = WardenConfig::default();
    config.ipc.endpoint = Some(endpoint.clone());
    config.watch.debounce_ms = 100;
    if watch_at_startup {
        config.watch.policy_path = Some(policy.clone());
    }

    let engine = Arc::new(MemoryEngine::new());
    let source = Arc::new(ManualSource::new());
    let agent = Agent::with_engine(config, engine.clone(), source.clone());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(agent.run(shutdown.clone()));

    for _ in 0..200 {
        if client::send(&endpoint, &Request::Ping).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Running {
        _dir: dir,
        endpoint,
        policy,
        engine,
        source,
        shutdown,
        task,
    }
}

impl Running {
    async fn send(&self, request: Request) -> Value {
        client::send(&self.endpoint, &request).await.unwrap()
    }

    async fn status(&self) -> Value {
        self.send(Request::WatchStatus).await
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap();
        assert!(!std::path::Path::new(&self.endpoint).exists());
    }
}

#[tokio::test]
async fn ping_answers_with_version() {
    let agent = start(false).await;
    let reply = agent.send(Request::Ping).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["version"], env!("CARGO_PKG_VERSION"));
    agent.stop().await;
}

#[tokio::test]
async fn startup_policy_is_applied_and_watched() {
    let agent = start(true).await;
    let status = agent.status().await;
    assert_eq!(status["watching"], true);
    assert_eq!(status["policyPath"], agent.policy.display().to_string());
    assert_eq!(status["applyCount"], 1);
    assert_eq!(agent.engine.commits(), 1);
    agent.stop().await;
}

#[tokio::test]
async fn edits_are_debounced_into_one_apply() {
    let agent = start(false).await;
    let reply = agent
        .send(Request::WatchSet {
            policy_path: Some(agent.policy.display().to_string()),
            debounce_ms: Some(100),
        })
        .await;
    assert_eq!(reply["initialApplySuccess"], true);
    assert_eq!(agent.source.live_subscriptions(), 1);

    let edited = format!(
        "{POLICY}\n[[filters]]\nname = \"block ssh\"\naction = \"block\"\ndirection = \"outbound\"\n"
    );
    std::fs::write(&agent.policy, edited).unwrap();
    for _ in 0..5 {
        agent.source.emit();
    }

    let mut status = Value::Null;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = agent.status().await;
        if status["applyCount"] == 2 {
            break;
        }
    }
    assert_eq!(status["applyCount"], 2);
    assert_eq!(status["errorCount"], 0);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(agent.status().await["applyCount"], 2);
    assert_eq!(agent.engine.commits(), 2);
    agent.stop().await;
}

#[tokio::test]
async fn one_connection_serves_many_requests() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let agent = start(false).await;
    let stream = tokio::net::UnixStream::connect(&agent.endpoint).await.unwrap();
    let (read, mut write) = stream.into_split();
    write
        .write_all(b"{\"type\":\"ping\"}\n{\"type\":\"watch-status\"}\n{\"type\":\"bogus\"}\n")
        .await
        .unwrap();
    write.shutdown().await.unwrap();

    let mut lines = BufReader::new(read).lines();
    let mut replies = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        replies.push(serde_json::from_str::<Value>(&line).unwrap());
    }
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["ok"], true);
    assert_eq!(replies[1]["watching"], false);
    assert_eq!(replies[2]["ok"], false);
    agent.stop().await;
}

#[tokio::test]
async fn second_agent_on_a_live_socket_fails() {
    let agent = start(false).await;
    let mut config = WardenConfig::default();
    config.ipc.endpoint = Some(agent.endpoint.clone());
    let second = Agent::with_engine(
        config,
        Arc::new(MemoryEngine::new()),
        Arc::new(ManualSource::new()),
    );
    let err = second.run(CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("already listening"));
    agent.stop().await;
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = dir.path().join("warden.sock");
    drop(std::os::unix::net::UnixListener::bind(&endpoint).unwrap());
    assert!(endpoint.exists());

    let mut config = WardenConfig::default();
    config.ipc.endpoint = Some(endpoint.display().to_string());
    let agent = Agent::with_engine(
        config,
        Arc::new(MemoryEngine::new()),
        Arc::new(ManualSource::new()),
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(agent.run(shutdown.clone()));

    let endpoint = endpoint.display().to_string();
    let mut reply = None;
    for _ in 0..200 {
        if let Ok(r) = client::send(&endpoint, &Request::Ping).await {
            reply = Some(r);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(reply.unwrap()["ok"], true);
    shutdown.cancel();
    task.await.unwrap().unwrap();
}
