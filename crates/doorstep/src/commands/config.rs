//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use doorstep_config::DoorstepConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./doorstep.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local } => cmd_init(local),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    println!("# engine = {}", ctx.engine);
    print!("{}", ctx.config.to_toml()?);
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    for (i, source) in ctx.sources.iter().enumerate() {
        let status = if source.loaded { "loaded" } else { "not found" };
        println!("{}. {} ({status})", i + 1, source.path.display());
    }
    Ok(())
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("doorstep.toml")
    } else {
        match doorstep_config::xdg_config_path() {
            Some(path) => path,
            None => bail!("Could not determine the user config directory"),
        }
    };
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }

    let config = DoorstepConfig {
        engine: Some(Default::default()),
        container: Some(Default::default()),
        cluster: Some(Default::default()),
        images: Some(doorstep_config::ImageRef::defaults()),
        report: Some(Default::default()),
    };
    doorstep_config::save_config(&config, &path)?;
    println!("Created {}", path.display());
    Ok(())
}

fn cmd_path() -> Result<()> {
    match doorstep_config::xdg_config_path() {
        Some(path) => println!("{}", path.display()),
        None => bail!("Could not determine the user config directory"),
    }
    Ok(())
}
