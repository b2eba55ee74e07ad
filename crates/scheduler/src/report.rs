use serde::Serialize;

use agentsim_core_types::{AppName, ErrorKind, EventId, RunId, SimError, ToolCall};
use agentsim_event_graph::{EventKind, EventResult, EventStatus};

use crate::metrics::SchedulerMetricsSnapshot;
use crate::model::ClockMode;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every event reached a terminal state on its own.
    Completed,
    DeadlineExceeded,
    Cancelled,
}

/// Trace line for one event. Offsets are run clock milliseconds.
#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub id: EventId,
    pub kind: EventKind,
    pub target: String,
    pub app: Option<AppName>,
    pub label: Option<String>,
    pub status: EventStatus,
    pub ready_ms: Option<u64>,
    pub started_ms: Option<u64>,
    pub finished_ms: Option<u64>,
    /// Call that actually executed, when one did.
    pub executed: Option<ToolCall>,
    pub result: Option<EventResult>,
}

impl EventRecord {
    pub fn output(&self) -> Option<&serde_json::Value> {
        self.result.as_ref().and_then(EventResult::output)
    }

    pub fn error(&self) -> Option<&SimError> {
        self.result.as_ref().and_then(EventResult::error)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(SimError::kind)
    }
}

/// Expected action carried by an oracle event.
#[derive(Clone, Debug, Serialize)]
pub struct OracleExpectation {
    pub event: EventId,
    pub expected: ToolCall,
    /// Agent event that already performed an equivalent call.
    pub satisfied_by: Option<EventId>,
    pub executed: bool,
    pub status: EventStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentResult {
    pub event: EventId,
    pub hint: Option<ToolCall>,
    /// `None` when the agent took no action or never answered.
    pub decision: Option<ToolCall>,
    pub status: EventStatus,
    pub error: Option<SimError>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub clock: ClockMode,
    pub elapsed_ms: u64,
    pub events: Vec<EventRecord>,
    pub oracle: Vec<OracleExpectation>,
    pub agent: Vec<AgentResult>,
    pub metrics: SchedulerMetricsSnapshot,
}

impl RunReport {
    pub fn event(&self, id: &EventId) -> Option<&EventRecord> {
        self.events.iter().find(|record| &record.id == id)
    }

    pub fn by_label(&self, label: &str) -> Option<&EventRecord> {
        self.events
            .iter()
            .find(|record| record.label.as_deref() == Some(label))
    }

    pub fn count(&self, status: EventStatus) -> usize {
        self.events
            .iter()
            .filter(|record| record.status == status)
            .count()
    }

    pub fn all_terminal(&self) -> bool {
        self.events.iter().all(|record| record.status.is_terminal())
    }

    pub fn failures(&self) -> impl Iterator<Item = &EventRecord> + '_ {
        self.events
            .iter()
            .filter(|record| record.status == EventStatus::Failed)
    }

    pub fn oracle_satisfied(&self) -> usize {
        self.oracle
            .iter()
            .filter(|expectation| expectation.satisfied_by.is_some())
            .count()
    }
}
