mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use kube_beacon::config::DEFAULT_CONFIG_PATH;

// ============================================================================
// CLI Types
// ============================================================================

/// kube-beacon - Kubernetes warning events and CronJob heartbeats for your monitoring backend
#[derive(Parser, Debug)]
#[command(version = kube_beacon::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the cluster and forward events and check-ins
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Comma-separated namespaces to watch, or `__all__` (overrides config and env)
        #[arg(short, long)]
        namespaces: Option<String>,

        /// Replay events the API server still retains
        #[arg(long)]
        historical: bool,
    },

    /// Diagnose configuration and cluster access
    Doctor {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            namespaces,
            historical,
        } => commands::run::run(&config, namespaces.as_deref(), historical).await,
        Commands::Doctor { config, format } => commands::doctor::run(&config, &format).await,
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
