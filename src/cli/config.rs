use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde_json::Value as JsonValue;

use super::output::{render_structured, OutputFormat};
use crate::cli::context::CliContext;
use crate::config::lookup;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Get a configuration value by dotted key, e.g. `scheduler.tick`
    Get {
        /// Configuration key
        key: String,
    },

    /// Validate configuration
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let config = ctx.config();
    match args.action {
        ConfigAction::Show => {
            if let Some(rendered) = render_structured(config, output)? {
                println!("{rendered}");
            } else {
                println!("Current configuration ({}):", ctx.config_source());
                print!("{}", serde_yaml::to_string(config)?);
            }
        }
        ConfigAction::Get { key } => {
            let doc = serde_json::to_value(config)?;
            let Some(value) = lookup(&doc, &key) else {
                bail!("Configuration key not found: {key}");
            };
            match value {
                JsonValue::String(text) => println!("{text}"),
                other => println!("{}", serde_json::to_string(other)?),
            }
        }
        ConfigAction::Validate => {
            config.validate()?;
            println!("Configuration is valid ({})", ctx.config_source());
        }
    }
    Ok(())
}
