//! FlowCache CLI
//!
//! Unified command-line interface for:
//! - Building the cache artifact set from raw flow CSV + boundary files
//! - Querying a built cache (local directory or HTTP file server)
//! - Inspecting a cache's summary and manifest

use anyhow::Result;
use clap::{Parser, Subcommand};

mod build;
mod inspect;
mod query;

#[derive(Parser)]
#[command(name = "flowcache")]
#[command(
    author,
    version,
    about = "FlowCache: migration-flow cache builder and query engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the cache artifact set from a flow CSV and boundary files.
    Build(build::BuildArgs),

    /// Query a built cache for ranked flow arcs (or net totals).
    Query(query::QueryArgs),

    /// Print a cache's summary statistics and partition manifest.
    Inspect(inspect::InspectArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build::run(&args),
        Commands::Query(args) => query::run(&args).await,
        Commands::Inspect(args) => inspect::run(&args).await,
    }
}
