use anyhow::Result;

use super::config::cmd_config;
use super::env::CliArgs;
use super::list::cmd_list;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::List => cmd_list(cli.output).await,
        Commands::Run(args) => cmd_run(args, ctx, cli.output).await,
        Commands::Config(args) => cmd_config(args, ctx, cli.output).await,
    }
}
