mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "siphon",
    version,
    about = "Incremental fetch, dedup, and forward relay"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to relay YAML file
    #[arg(long, default_value = "siphon.yaml", global = true)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one forward cycle for every configured stream
    Run {
        /// Only run the named stream
        #[arg(long)]
        stream: Option<String>,
    },
    /// Show persisted cursor and statistics per stream
    Stats {
        /// Only show the named stream
        #[arg(long)]
        stream: Option<String>,
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop the persisted cursor for a stream
    Reset {
        /// Stream to reset
        #[arg(long)]
        stream: String,
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },
    /// Validate relay configuration and connectivity
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { stream } => commands::run::execute(&cli.config, stream.as_deref()).await,
        Commands::Stats { stream, json } => {
            commands::stats::execute(&cli.config, stream.as_deref(), json).await
        }
        Commands::Reset { stream, yes } => commands::reset::execute(&cli.config, &stream, yes).await,
        Commands::Check => commands::check::execute(&cli.config).await,
    }
}
