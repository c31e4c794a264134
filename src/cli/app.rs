use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, LoadedConfig};

pub async fn run() -> Result<ExitCode> {
    let cli = CliArgs::parse();

    let LoadedConfig {
        config,
        path,
        found,
    } = load_config(cli.config.as_ref()).await?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log.level).to_string();
    init_logging(&level, cli.debug)?;

    info!("Starting Handoff v{}", env!("CARGO_PKG_VERSION"));
    if found {
        info!("Loaded configuration from: {}", path.display());
    } else {
        warn!("Config file not found, using defaults: {}", path.display());
    }

    let cli_context = CliContext::new(config, path);
    match dispatch(&cli, &cli_context).await {
        Ok(code) => {
            info!("Command finished");
            Ok(code)
        }
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}
