//! CLI command definitions and dispatch.

mod images;
mod pull;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use layerdb_core::config::StoreConfig;
use layerdb_core::error::Result;

/// layerdb - pull container images into content-addressed stores.
#[derive(Parser)]
#[command(name = "layerdb", version, about)]
pub struct Cli {
    /// Store root directory [default: ~/.layerdb]
    #[arg(long, global = true, env = "LAYERDB_ROOT")]
    pub root: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Pull an image from a registry
    Pull(pull::PullArgs),
    /// List stored images
    Images(images::ImagesArgs),
}

impl Cli {
    /// Resolve the store configuration.
    ///
    /// The config file is loaded first; `--root` then overrides both store
    /// roots. Roots set by neither live under `~/.layerdb`.
    pub fn store_config(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path, default_root())?,
            None => StoreConfig::with_root(default_root()),
        };

        if let Some(root) = &self.root {
            let rooted = StoreConfig::with_root(root);
            config.image_root = rooted.image_root;
            config.layer_root = rooted.layer_root;
        }

        Ok(config)
    }
}

/// Return the default store root (~/.layerdb).
pub(crate) fn default_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".layerdb"))
        .unwrap_or_else(|| PathBuf::from(".layerdb"))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(
    cli: Cli,
    config: StoreConfig,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Pull(args) => pull::execute(args, &config).await,
        Command::Images(args) => images::execute(args, &config).await,
    }
}
