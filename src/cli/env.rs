use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;
use super::output::OutputFormat;
use crate::config::LogFormat;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("AGENTSIM_GIT_REVISION"),
    ", built ",
    env!("AGENTSIM_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(long_version = LONG_VERSION)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (defaults to the configured level)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Log line format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = CliArgs::try_parse_from([
            "agentsim",
            "--output",
            "json",
            "run",
            "gmail_test_scenario",
            "--agent",
            "silent",
            "--clock",
            "real-time",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.scenario, "gmail_test_scenario");
                assert_eq!(args.agent, crate::cli::run::AgentKind::Silent);
                assert_eq!(args.clock, Some(crate::cli::run::ClockArg::RealTime));
            }
            _ => panic!("expected run"),
        }
    }
}
