use clap::Subcommand;

use super::config::ConfigArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// List registered scenarios
    List,

    /// Run a scenario and validate its outcome
    Run(RunArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}
