use std::time::Duration;

use serde::{Deserialize, Serialize};

use agentsim_event_graph::FailurePolicy;

/// How event delays map onto time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Delays are logical offsets; the clock jumps to the next deadline whenever
    /// nothing is in flight.
    #[default]
    Virtual,
    /// Delays are actual waits.
    RealTime,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub clock: ClockMode,
    /// Poll granularity of the real-time loop.
    pub tick: Duration,
    /// Bound on one agent decision.
    pub agent_timeout: Duration,
    /// Bound on one capability execution, lock waits excluded.
    pub call_timeout: Duration,
    /// Bound on the gap between an event's first and last predecessor resolving.
    pub dependency_timeout: Option<Duration>,
    /// Global execution slots shared by every app.
    pub max_concurrency: usize,
    /// Default downstream policy; events may override it.
    pub failure_policy: FailurePolicy,
    /// Scenario budget measured on the run clock.
    pub duration: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Virtual,
            tick: Duration::from_millis(10),
            agent_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            dependency_timeout: None,
            max_concurrency: 8,
            failure_policy: FailurePolicy::PropagateSkip,
            duration: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }
}
