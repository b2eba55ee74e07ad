use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::fs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};
use crate::errors::ConfigError;

/// Logs go to stderr; stdout carries command output only.
pub fn init_logging(level: &str, format: LogFormat, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.context("Failed to install log subscriber")?;
    Ok(())
}

pub struct LoadedConfig {
    pub config: Config,
    /// File the configuration came from; `None` means built-in defaults.
    pub path: Option<PathBuf>,
    /// Number of `AGENTSIM__*` environment overrides applied.
    pub overrides: usize,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        }
        None => default_config_path(),
    };

    let mut config = match &path {
        Some(path) => read_config_file(path).await?,
        None => Config::default(),
    };
    let overrides = config.apply_env_overrides(std::env::vars())?;
    config.validate()?;
    Ok(LoadedConfig {
        config,
        path,
        overrides,
    })
}

/// Priority: ./config/agentsim.yaml > <config dir>/agentsim/config.yaml
fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from("config/agentsim.yaml");
    if local.exists() {
        return Some(local);
    }
    let mut path = dirs::config_dir()?;
    path.push("agentsim");
    path.push("config.yaml");
    path.exists().then_some(path)
}

async fn read_config_file(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Config::from_yaml_str(&raw)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
