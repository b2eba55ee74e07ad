use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agentsim_scheduler::{Agent, ClockMode, OracleAgent, SilentAgent};

use super::context::CliContext;
use super::output::{render_outcome, OutputFormat};
use crate::config::Config;
use crate::scenario::ScenarioRunner;
use crate::scenarios::builtin_registry;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum AgentKind {
    /// Replays each agent slot's reference action
    Oracle,
    /// Never answers; every agent slot times out
    Silent,
}

impl AgentKind {
    fn build(self) -> Arc<dyn Agent> {
        match self {
            AgentKind::Oracle => Arc::new(OracleAgent::new()),
            AgentKind::Silent => Arc::new(SilentAgent),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ClockArg {
    Virtual,
    RealTime,
}

impl From<ClockArg> for ClockMode {
    fn from(value: ClockArg) -> Self {
        match value {
            ClockArg::Virtual => ClockMode::Virtual,
            ClockArg::RealTime => ClockMode::RealTime,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Scenario id (see `agentsim list`)
    pub scenario: String,

    /// Agent resolving agent events
    #[arg(long, value_enum, default_value = "oracle")]
    pub agent: AgentKind,

    /// Clock mode, overriding the configuration
    #[arg(long, value_enum)]
    pub clock: Option<ClockArg>,

    /// Bound on each agent decision, e.g. "2s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub agent_timeout: Option<Duration>,

    /// Write the run trace to FILE
    #[arg(long, value_name = "FILE")]
    pub trace: Option<PathBuf>,

    /// Exit with an error when validation fails
    #[arg(long)]
    pub strict: bool,
}

impl RunArgs {
    fn effective_config(&self, base: &Config) -> Result<Config> {
        let mut config = base.clone();
        if let Some(clock) = self.clock {
            config.scheduler.clock = clock.into();
        }
        if let Some(timeout) = self.agent_timeout {
            config.scheduler.agent_timeout = timeout;
        }
        config.validate().context("invalid run options")?;
        Ok(config)
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let registry = builtin_registry()?;
    let scenario = registry.get(&args.scenario)?;
    let config = args.effective_config(ctx.config())?;
    info!(
        scenario = scenario.id(),
        agent = ?args.agent,
        clock = ?config.scheduler.clock,
        "running scenario"
    );

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; draining in-flight events");
                cancel.cancel();
            }
        })
    };

    let runner = ScenarioRunner::new(config).with_trace(args.trace.clone());
    let outcome = runner
        .run_and_validate(scenario.as_ref(), args.agent.build(), cancel)
        .await;
    interrupt.abort();
    let outcome = outcome.with_context(|| format!("scenario {} did not run", args.scenario))?;

    print!("{}", render_outcome(&outcome, output)?);
    if output != OutputFormat::Text {
        println!();
    }
    if args.strict && !outcome.validation.verdict {
        bail!("scenario {} failed validation", outcome.scenario);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_configuration() {
        let args = RunArgs {
            scenario: "gmail_test_scenario".into(),
            agent: AgentKind::Oracle,
            clock: Some(ClockArg::RealTime),
            agent_timeout: Some(Duration::from_millis(250)),
            trace: None,
            strict: false,
        };
        let config = args.effective_config(&Config::default()).unwrap();
        assert_eq!(config.scheduler.clock, ClockMode::RealTime);
        assert_eq!(config.scheduler.agent_timeout, Duration::from_millis(250));
    }

    #[test]
    fn zero_agent_timeout_is_rejected() {
        let args = RunArgs {
            scenario: "gmail_test_scenario".into(),
            agent: AgentKind::Silent,
            clock: None,
            agent_timeout: Some(Duration::ZERO),
            trace: None,
            strict: true,
        };
        assert!(args.effective_config(&Config::default()).is_err());
    }
}
