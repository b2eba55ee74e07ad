//! Scenario surface: how a scenario populates an environment, what events it
//! schedules, and how its outcome is judged.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agentsim_event_graph::{EventGraph, FailurePolicy};
use agentsim_scheduler::{Agent, RunReport};

use crate::config::Config;
use crate::environment::Environment;
use crate::errors::ScenarioError;
use crate::validator::{ValidationInput, ValidationResult, Validator};

pub trait Scenario: Send + Sync {
    fn id(&self) -> &str;

    /// Simulated world time, in seconds, at which the run clock starts.
    fn start_time(&self) -> f64 {
        0.0
    }

    /// Budget on the run clock; `None` runs until every event is terminal.
    fn duration(&self) -> Option<Duration>;

    fn user_prompt(&self) -> Option<&str> {
        None
    }

    /// Overrides the configured downstream policy for this scenario.
    fn failure_policy(&self) -> Option<FailurePolicy> {
        None
    }

    fn init_and_populate_apps(&self, env: &Environment) -> Result<(), ScenarioError>;

    fn build_events_flow(&self, env: &Environment) -> Result<EventGraph, ScenarioError>;

    fn validate(&self, input: &ValidationInput<'_>) -> ValidationResult;
}

/// Explicitly registered scenarios, listed in id order.
#[derive(Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, Arc<dyn Scenario>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scenario: Arc<dyn Scenario>) -> Result<(), ScenarioError> {
        let id = scenario.id().to_string();
        if self.scenarios.contains_key(&id) {
            return Err(ScenarioError::Duplicate(id));
        }
        self.scenarios.insert(id, scenario);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Scenario>, ScenarioError> {
        self.scenarios
            .get(id)
            .cloned()
            .ok_or_else(|| ScenarioError::Unknown(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.scenarios.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Scenario>> + '_ {
        self.scenarios.values()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub start_time: f64,
    pub generated_at: DateTime<Utc>,
    pub report: RunReport,
    pub validation: ValidationResult,
    /// Trace file written for this run, if any.
    pub trace: Option<PathBuf>,
}

impl ScenarioOutcome {
    /// World time, in seconds, of a run clock offset.
    pub fn world_time(&self, clock_ms: u64) -> f64 {
        self.start_time + clock_ms as f64 / 1000.0
    }
}

/// Builds a fresh environment per scenario, runs it and validates the result.
pub struct ScenarioRunner {
    config: Config,
    trace: Option<PathBuf>,
}

impl ScenarioRunner {
    pub fn new(config: Config) -> Self {
        let trace = config.trace.output.clone();
        Self { config, trace }
    }

    pub fn with_trace(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.trace = path;
        }
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run_and_validate(
        &self,
        scenario: &dyn Scenario,
        agent: Arc<dyn Agent>,
        cancel: CancellationToken,
    ) -> Result<ScenarioOutcome, ScenarioError> {
        let env = Environment::from_config(&self.config);
        let result = self.drive(scenario, &env, agent, cancel).await;
        // resources are released even when the run itself failed
        let stopped = env.shutdown().await;
        let (report, validation) = result?;
        stopped?;

        let trace = match &self.trace {
            Some(path) => {
                env.write_trace(path)?;
                Some(path.clone())
            }
            None => None,
        };
        info!(
            scenario = scenario.id(),
            verdict = validation.verdict,
            status = ?report.status,
            "scenario finished"
        );
        Ok(ScenarioOutcome {
            scenario: scenario.id().to_string(),
            start_time: scenario.start_time(),
            generated_at: Utc::now(),
            report,
            validation,
            trace,
        })
    }

    async fn drive(
        &self,
        scenario: &dyn Scenario,
        env: &Environment,
        agent: Arc<dyn Agent>,
        cancel: CancellationToken,
    ) -> Result<(RunReport, ValidationResult), ScenarioError> {
        info!(scenario = scenario.id(), "initialising scenario");
        scenario.init_and_populate_apps(env)?;
        env.start().await?;
        let graph = scenario.build_events_flow(env)?;

        let mut config = self
            .config
            .scheduler_config()
            .with_duration(scenario.duration());
        if let Some(policy) = scenario.failure_policy() {
            config.failure_policy = policy;
        }
        let report = env.run(&graph, agent, config, cancel).await?;
        let failed = report.failures().count();
        if failed > 0 {
            warn!(scenario = scenario.id(), failed, "run finished with failed events");
        }
        let validation = Validator::new(|input| scenario.validate(input)).validate(env, &report);
        Ok((report, validation))
    }
}
