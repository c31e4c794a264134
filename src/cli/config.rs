use crate::cli::context::CliContext;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use handoff_kernel::HandoffConfig;
use tokio::fs;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file plus environment overrides)
    Show,

    /// Print the configuration file location
    Path,

    /// Validate the configuration file
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path();
    match args.action {
        ConfigAction::Show => {
            println!("{}", render(ctx.config())?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Validate => {
            if fs::try_exists(path).await? {
                let raw = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                HandoffConfig::from_yaml_str(&raw)
                    .and_then(|config| config.validate().map(|_| config))
                    .with_context(|| format!("parsing {}", path.display()))?;
                println!("Configuration file {} is valid", path.display());
            } else {
                println!(
                    "No configuration file at {}; defaults are valid",
                    path.display()
                );
            }
        }
    }

    Ok(())
}

/// YAML rendering with secrets masked.
pub fn render(config: &HandoffConfig) -> Result<String> {
    serde_yaml::to_string(&config.redacted()).context("serializing configuration")
}
