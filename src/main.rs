//! Trellis CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Budget-bounded context assembly over code dependency graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a context slice from a graph snapshot
    Assemble(commands::AssembleArgs),
    /// Apply a batch of file changes to a graph snapshot
    Apply(commands::ApplyArgs),
    /// Show node/edge counts for a graph snapshot
    Inspect {
        /// Graph snapshot JSON file
        #[arg(long)]
        graph: PathBuf,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "trellis={log_level},trellis_core={log_level},trellis_context={log_level},trellis_sync={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Assemble(args) => commands::assemble(args).await,
        Commands::Apply(args) => commands::apply(args).await,
        Commands::Inspect { graph } => commands::inspect(graph),
        Commands::Version => {
            println!("trellis {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
