mod agent_commands;
mod config_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    warden_agent::Agent,
    warden_config::{Severity, WardenConfig},
    warden_engine::Policy,
};

#[derive(Parser)]
#[command(name = "warden", version, about = "Warden: host firewall policy agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./warden.toml and the user config dir).
    #[arg(long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Control channel endpoint (overrides config value).
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Print raw JSON responses from the agent.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default when no subcommand is provided).
    Run,
    /// Control policy file watching on a running agent.
    Watch {
        #[command(subcommand)]
        action: agent_commands::WatchAction,
    },
    /// Apply a policy file once through a running agent.
    Apply { path: PathBuf },
    /// Check that the agent is reachable.
    Ping,
    /// Parse and validate a policy file without applying it.
    Check { path: PathBuf },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load, validate and env-override the config. Validation errors abort.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<WardenConfig> {
    let result = warden_config::validate(path);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!(diagnostic = %d, "config"),
            Severity::Warning => warn!(diagnostic = %d, "config"),
            Severity::Info => info!(diagnostic = %d, "config"),
        }
    }
    if result.has_errors() {
        anyhow::bail!(
            "invalid configuration: {} error(s); run `warden config check` for details",
            result.count(Severity::Error)
        );
    }

    let config = match result.config_path.as_deref() {
        Some(path) => warden_config::load_config(path)?,
        None => WardenConfig::default(),
    };
    Ok(warden_config::apply_env_overrides(config))
}

/// Resolve the endpoint without requiring a valid config.
fn client_endpoint(cli: &Cli) -> String {
    if let Some(endpoint) = &cli.endpoint {
        return endpoint.clone();
    }
    let config = match cli.config.as_deref() {
        Some(path) => warden_config::load_config(path).unwrap_or_default(),
        None => warden_config::discover_and_load(),
    };
    warden_config::apply_env_overrides(config).endpoint()
}

async fn run_agent(cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(endpoint) = &cli.endpoint {
        config.ipc.endpoint = Some(endpoint.clone());
    }

    let agent = Agent::from_config(config)?;
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        signal.cancel();
    });

    agent.run(shutdown).await?;
    Ok(())
}

fn check_policy(path: &Path) -> anyhow::Result<()> {
    let policy = Policy::load(path)?;
    let fingerprint = policy.fingerprint()?;
    println!("{}: ok", path.display());
    println!("  provider:    {} ({})", policy.provider.name, policy.provider.key);
    println!(
        "  sublayer:    {} ({}, weight {})",
        policy.sublayer.name, policy.sublayer.key, policy.sublayer.weight
    );
    println!("  filters:     {}", policy.filters.len());
    println!("  fingerprint: {fingerprint}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command.take().unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(version = env!("CARGO_PKG_VERSION"), "warden starting");
            run_agent(&cli).await
        },
        Commands::Watch { action } => {
            agent_commands::handle_watch(&client_endpoint(&cli), action, cli.json).await
        },
        Commands::Apply { path } => {
            agent_commands::handle_apply(&client_endpoint(&cli), path, cli.json).await
        },
        Commands::Ping => agent_commands::handle_ping(&client_endpoint(&cli), cli.json).await,
        Commands::Check { path } => {
            check_policy(&path).with_context(|| format!("checking {}", path.display()))
        },
        Commands::Config { action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
    }
}
