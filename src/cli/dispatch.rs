use std::process::ExitCode;

use super::config::cmd_config;
use super::env::CliArgs;
use super::info::cmd_info;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<ExitCode> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await.map(|_| ExitCode::SUCCESS),
        Commands::Info => cmd_info(ctx).await.map(|_| ExitCode::SUCCESS),
    }
}
