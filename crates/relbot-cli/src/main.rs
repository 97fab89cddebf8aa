mod cmd;
mod output;

use clap::{Parser, Subcommand};
use relbot_core::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relbot",
    about = "Release status notifier: watches ShipIt releases and their Taskcluster graphs, reports to Slack",
    version,
    propagate_version = true
)]
struct Cli {
    /// YAML config file (settings may also come from RELBOT_* variables)
    #[arg(long, global = true, env = "RELBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Release store file (overrides `db_path`)
    #[arg(long, global = true, env = "RELBOT_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive Slack events and reconcile releases periodically
    Serve,

    /// Print what the `status` chat command would reply
    Status {
        /// Release name or fragment (omit for every release in flight)
        release: Option<String>,

        /// Output the Block Kit message as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Run one reconciliation cycle and exit
    Check {
        /// Output the cycle report as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Status { .. } => tracing::Level::WARN,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Serve => cmd::serve::run(config),
        Commands::Status { release, json } => cmd::status::run(config, release.as_deref(), json),
        Commands::Check { json } => cmd::check::run(config, json),
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    config.validate()?;
    Ok(config)
}
