//! Doorstep - run data-validation processors over a data file
//!
//! Main entry point for the doorstep CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use doorstep_config::EngineKind;

mod builtin;
mod commands;

use commands::{config, process, processors, serve};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Doorstep - run data-validation processors over a data file
#[derive(Parser)]
#[command(name = "doorstep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine to run processors with (overrides configuration)
    #[arg(short, long, global = true, env = "DOORSTEP_ENGINE")]
    pub engine: Option<EngineKind>,

    /// Config file to use instead of discovering one
    #[arg(long, global = true, env = "DOORSTEP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bucket that data filenames are resolved against
    #[arg(short, long, global = true)]
    pub bucket: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a processor over a data file and print the report
    Process(process::ProcessArgs),

    /// List the processors built into this binary
    Processors,

    /// Answer RPC calls, one JSON request per stdin line
    Serve(serve::ServeArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "doorstep=debug,doorstep_engine=debug,doorstep_container=debug,doorstep_cluster=debug,doorstep_config=debug,doorstep_server=debug,info"
    } else {
        "doorstep=info,doorstep_engine=info,doorstep_container=info,doorstep_cluster=info,doorstep_server=info,warn"
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let ctx = commands::Context::load(cli.config.as_deref(), cli.engine, cli.bucket, cli.verbose)?;

    match cli.command {
        Commands::Process(args) => process::run(args, &ctx).await,
        Commands::Processors => processors::run(&ctx),
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx),
    }
}
