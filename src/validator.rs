//! Scenario verdicts. A [`Validator`] wraps a scenario predicate and runs it
//! once against a finished run.

use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use agentsim_event_graph::EventStatus;
use agentsim_scheduler::{AgentResult, OracleExpectation, RunReport};

use crate::environment::Environment;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub verdict: bool,
    pub feedback: Option<String>,
    /// Partial credit in `[0, 1]`.
    pub score: Option<f64>,
    /// Set when the predicate itself could not run to completion.
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            verdict: true,
            ..Self::default()
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            verdict: false,
            feedback: Some(feedback.into()),
            ..Self::default()
        }
    }

    pub fn errored(error: impl Into<String>) -> Self {
        Self {
            verdict: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    /// Non-finite scores are dropped, the rest clamped into `[0, 1]`.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.is_finite().then(|| score.clamp(0.0, 1.0));
        self
    }
}

/// Everything a scenario predicate may look at.
pub struct ValidationInput<'a> {
    pub env: &'a Environment,
    pub report: &'a RunReport,
}

impl<'a> ValidationInput<'a> {
    pub fn oracle(&self) -> &'a [OracleExpectation] {
        &self.report.oracle
    }

    pub fn agent_results(&self) -> &'a [AgentResult] {
        &self.report.agent
    }

    pub fn completed_agent_results(&self) -> impl Iterator<Item = &'a AgentResult> + 'a {
        self.report
            .agent
            .iter()
            .filter(|result| result.status == EventStatus::Completed)
    }

    /// Share of oracle expectations an agent action already satisfied, or
    /// `None` when the scenario has no oracle events.
    pub fn oracle_match_ratio(&self) -> Option<f64> {
        let total = self.report.oracle.len();
        if total == 0 {
            return None;
        }
        Some(self.report.oracle_satisfied() as f64 / total as f64)
    }
}

type Predicate<'p> = Box<dyn FnOnce(&ValidationInput<'_>) -> ValidationResult + Send + 'p>;

pub struct Validator<'p> {
    predicate: Predicate<'p>,
}

impl<'p> Validator<'p> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: FnOnce(&ValidationInput<'_>) -> ValidationResult + Send + 'p,
    {
        Self {
            predicate: Box::new(predicate),
        }
    }

    /// Consumes the validator. The predicate only ever sees a run whose events
    /// are all terminal; a panicking predicate yields an errored result.
    pub fn validate(self, env: &Environment, report: &RunReport) -> ValidationResult {
        if !report.all_terminal() {
            warn!(run = %report.run_id, "validation refused: run left events non-terminal");
            return ValidationResult::errored("run report has non-terminal events");
        }
        let input = ValidationInput { env, report };
        let predicate = self.predicate;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| predicate(&input))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|msg| msg.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "validation predicate panicked".to_string());
                warn!(run = %report.run_id, %message, "validation predicate panicked");
                ValidationResult::errored(message)
            }
        };
        info!(
            run = %report.run_id,
            verdict = result.verdict,
            score = ?result.score,
            "validation finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use agentsim_apps::agent_ui;
    use agentsim_scheduler::{OracleAgent, SchedulerConfig};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    async fn finished_run(env: &Environment) -> RunReport {
        env.add_app(Arc::new(agent_ui::agent_user_interface().unwrap()))
            .unwrap();
        let mut builder = env.graph_builder();
        let ask = builder
            .on(agent_ui::NAME)
            .call("send_message_to_agent", json!({ "content": "hi" }))
            .unwrap()
            .id();
        let reply = json!({ "content": "hello" });
        builder
            .on(agent_ui::NAME)
            .expect_agent("send_message_to_user", reply.clone())
            .unwrap()
            .depends_on(Some(&ask), std::time::Duration::from_secs(1))
            .unwrap();
        builder
            .on(agent_ui::NAME)
            .call("send_message_to_user", reply)
            .unwrap()
            .oracle()
            .depends_on(Some(&ask), std::time::Duration::from_secs(2))
            .unwrap();
        builder
            .on(agent_ui::NAME)
            .call("list_messages", json!({}))
            .unwrap()
            .oracle()
            .depends_on(Some(&ask), std::time::Duration::from_secs(3))
            .unwrap();
        let graph = builder.finalize().unwrap();
        env.run(
            &graph,
            Arc::new(OracleAgent::new()),
            SchedulerConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn predicate_runs_exactly_once_with_partial_credit() {
        let env = Environment::default();
        let report = finished_run(&env).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let result = Validator::new(move |input| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert_eq!(input.agent_results().len(), 1);
            let ratio = input.oracle_match_ratio().unwrap_or(0.0);
            ValidationResult::pass().with_score(ratio)
        })
        .validate(&env, &report);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.verdict);
        assert_eq!(result.score, Some(0.5));
    }

    #[tokio::test]
    async fn panicking_predicate_is_reported() {
        let env = Environment::default();
        let report = finished_run(&env).await;
        let result = Validator::new(|_| panic!("state was garbage")).validate(&env, &report);
        assert!(!result.verdict);
        assert_eq!(result.error.as_deref(), Some("state was garbage"));
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(ValidationResult::pass().with_score(1.7).score, Some(1.0));
        assert_eq!(ValidationResult::pass().with_score(-0.2).score, Some(0.0));
        assert_eq!(ValidationResult::pass().with_score(f64::NAN).score, None);
    }
}
