use clap::Subcommand;

use super::config::ConfigArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run a job file and wait for it to finish
    Run(RunArgs),

    /// Inspect Handoff configuration
    Config(ConfigArgs),

    /// Show system information and health check
    Info,
}
