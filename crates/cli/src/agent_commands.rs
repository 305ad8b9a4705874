//! Commands that talk to a running agent over the control channel.

use std::path::PathBuf;

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    serde_json::Value,
    warden_agent::client,
    warden_protocol::Request,
};

#[derive(Subcommand)]
pub enum WatchAction {
    /// Watch a policy file and re-apply it whenever it changes.
    Set {
        /// Policy file (toml, yaml or json).
        path: PathBuf,
        /// Quiet period after the last change before applying (100-30000).
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
    /// Stop watching. Installed filters stay in place.
    Off,
    /// Show watch state and apply counters.
    Status,
}

pub async fn handle_watch(endpoint: &str, action: WatchAction, json: bool) -> Result<()> {
    let request = match action {
        WatchAction::Set { path, debounce_ms } => Request::WatchSet {
            policy_path: Some(absolute(path)?),
            debounce_ms,
        },
        WatchAction::Off => Request::WatchSet {
            policy_path: None,
            debounce_ms: None,
        },
        WatchAction::Status => Request::WatchStatus,
    };
    let status = matches!(request, Request::WatchStatus);
    let reply = client::send(endpoint, &request).await?;
    report(&reply, json, |reply| {
        if status {
            print_status(reply);
        } else {
            print_watch_set(reply);
        }
    })
}

pub async fn handle_apply(endpoint: &str, path: PathBuf, json: bool) -> Result<()> {
    let request = Request::Apply {
        policy_path: absolute(path)?,
    };
    let reply = client::send(endpoint, &request).await?;
    report(&reply, json, |reply| {
        let filters = reply["filterCount"].as_u64().unwrap_or_default();
        if reply["changed"].as_bool().unwrap_or_default() {
            println!("Applied {filters} filter(s).");
        } else {
            println!("Policy unchanged ({filters} filter(s) installed).");
        }
    })
}

pub async fn handle_ping(endpoint: &str, json: bool) -> Result<()> {
    let reply = client::send(endpoint, &Request::Ping).await?;
    report(&reply, json, |reply| {
        println!(
            "agent {} is up at {endpoint}",
            reply["version"].as_str().unwrap_or("?")
        );
    })
}

/// The agent may run with a different working directory.
fn absolute(path: PathBuf) -> Result<String> {
    let path = std::path::absolute(&path)
        .with_context(|| format!("resolving {}", path.display()))?;
    Ok(path.display().to_string())
}

fn report(reply: &Value, json: bool, render: impl FnOnce(&Value)) -> Result<()> {
    let ok = reply["ok"].as_bool().unwrap_or_default();
    if json {
        println!("{}", serde_json::to_string_pretty(reply)?);
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }
    if !ok {
        anyhow::bail!(
            "{}",
            reply["error"].as_str().unwrap_or("agent reported a failure")
        );
    }
    render(reply);
    Ok(())
}

fn print_watch_set(reply: &Value) {
    if reply["watching"] != true {
        println!("Watching disabled.");
        return;
    }
    println!("Watching {}", reply["policyPath"].as_str().unwrap_or_default());
    if reply["initialApplySuccess"] == true {
        println!("Initial apply succeeded.");
    } else if let Some(warning) = reply["warning"].as_str() {
        eprintln!("warning: initial apply failed: {warning}");
    }
}

fn print_status(reply: &Value) {
    let field = |name: &str| match &reply[name] {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let watching = if reply["watching"] == true {
        format!("yes ({})", field("policyPath"))
    } else {
        "no".into()
    };
    println!("Watching:    {watching}");
    println!("Debounce:    {} ms", field("debounceMs"));
    println!("Applies:     {}", field("applyCount"));
    println!("Errors:      {}", field("errorCount"));
    println!("Last apply:  {}", field("lastApplyTime"));
    if reply.get("lastError").is_some() {
        println!("Last error:  {} ({})", field("lastError"), field("lastErrorTime"));
    }
}
