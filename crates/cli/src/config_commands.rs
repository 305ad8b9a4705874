use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use warden_config::{Severity, validate};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration after env overrides.
    Show,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Show => {
            let config = crate::load_config(path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate(path);
    match &result.config_path {
        Some(path) => eprintln!("{}", path.display()),
        None => eprintln!("(defaults)"),
    }

    let shown: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .collect();
    for d in &shown {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };
        eprintln!("  {color}{d}{RESET}");
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors + warnings == 0 {
        eprintln!("config ok");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
