//! Process command - run one processor over one data file.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use doorstep_engine::ProcessorMetadata;
use tracing::info;

use super::Context;

/// Arguments for the process command.
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Data file to check (resolved against the bucket when one is given)
    pub filename: String,

    /// Processor module to run
    pub workflow: PathBuf,

    /// JSON file holding the processor's metadata
    #[arg(short, long)]
    pub metadata: Option<PathBuf>,

    /// Pretty-print the report
    #[arg(long)]
    pub pretty: bool,
}

/// Run the process command.
pub async fn run(args: ProcessArgs, ctx: &Context) -> Result<()> {
    let metadata = match &args.metadata {
        Some(path) => read_metadata(path)?,
        None => ProcessorMetadata::default(),
    };
    let engine = ctx.make_engine()?;
    info!(engine = engine.description(), filename = %args.filename, "Processing");

    let report = engine
        .run(&args.filename, &args.workflow, metadata, ctx.bucket.as_deref())
        .await?;

    let compiled = report.compile(None, None);
    let output = if args.pretty {
        serde_json::to_string_pretty(&compiled)?
    } else {
        compiled.to_json()?
    };
    println!("{output}");
    Ok(())
}

fn read_metadata(path: &Path) -> Result<ProcessorMetadata> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading metadata {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing metadata {}", path.display()))
}
