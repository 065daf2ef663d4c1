//! Configuration system for doorstep.
//!
//! Provides TOML-based configuration with:
//! - Engine selection (`[engine]`)
//! - Container engine settings (`[container]`)
//! - Pipeline-cluster polling and watch settings (`[cluster]`)
//! - The container image allow-list (`[[images]]`)
//! - Report limits for the RPC surface (`[report]`)
//!
//! Files are layered: the user config (`~/.config/doorstep/config.toml`, or
//! `$DOORSTEP_CONFIG_DIR/config.toml`) then the project-local
//! `./doorstep.toml`, later layers overriding earlier ones section by section.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
