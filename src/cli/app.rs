use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, LoadedConfig};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let LoadedConfig {
        config,
        path,
        overrides,
    } = load_config(cli.config.as_ref()).await?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let format = cli.log_format.unwrap_or(config.log_format);
    init_logging(level, format, cli.debug)?;

    info!("Starting agentsim v{}", env!("CARGO_PKG_VERSION"));
    let cli_context = CliContext::new(config, path);
    debug!(
        source = %cli_context.config_source(),
        overrides,
        "configuration loaded"
    );

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}
