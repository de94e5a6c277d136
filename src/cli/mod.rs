//! CLI module for Shellgate
//!
//! - `serve`: run the gateway (default)
//! - `probe`: check TCP reachability of an SSH endpoint

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod probe;

/// Shellgate remote session gateway
#[derive(Parser, Debug)]
#[command(name = "shellgate")]
#[command(about = "WebSocket to SSH terminal gateway")]
#[command(version)]
pub struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway (default)
    Serve,
    /// Check whether a host accepts TCP connections on its SSH port
    Probe(probe::ProbeArgs),
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Probe(args)) => {
            init_tracing(cli.json);
            probe::run(args).await
        }
        Some(Commands::Serve) | None => {
            let config = crate::server::load_config()?;
            init_tracing(cli.json || config.logging.json);
            crate::server::run(config).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "shellgate=info,shellgate_core=info,shellgate_ssh=info,tower_http=info".into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}
