use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentsim_core_types::{AppName, EventId, SimError, ToolCall};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    UserAction,
    AgentAction,
    OracleAction,
}

/// Lifecycle: `Pending -> Ready -> Running -> {Completed | Failed}`, or `Skipped`
/// from any non-terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Failed | EventStatus::Skipped
        )
    }

    pub fn can_transition_to(self, next: EventStatus) -> bool {
        use EventStatus::{Completed, Failed, Pending, Ready, Running, Skipped};
        match (self, next) {
            (Pending, Ready) | (Ready, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            // dependency timeouts fail an event before it ever becomes ready
            (Pending, Failed) | (Ready, Failed) => true,
            (Pending, Skipped) | (Ready, Skipped) => true,
            _ => false,
        }
    }
}

/// What the scheduler does when a predecessor ends `Failed` or `Skipped`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Successors become `Skipped` transitively.
    #[default]
    PropagateSkip,
    /// A failed or skipped predecessor counts as resolved.
    AttemptAnyway,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSlot {
    /// App the agent is expected to act on, when known.
    pub app: Option<AppName>,
    /// Reference action for this slot; replayed by the oracle agent.
    pub hint: Option<ToolCall>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventTarget {
    Call(ToolCall),
    Agent(AgentSlot),
}

impl EventTarget {
    pub fn app(&self) -> Option<&AppName> {
        match self {
            EventTarget::Call(call) => Some(&call.app),
            EventTarget::Agent(slot) => slot.app.as_ref(),
        }
    }

    pub fn call(&self) -> Option<&ToolCall> {
        match self {
            EventTarget::Call(call) => Some(call),
            EventTarget::Agent(slot) => slot.hint.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    pub target: EventTarget,
    pub dependencies: Vec<EventId>,
    pub delay: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
}

impl Event {
    pub fn describe(&self) -> String {
        match &self.target {
            EventTarget::Call(call) => call.to_string(),
            EventTarget::Agent(slot) => match &slot.app {
                Some(app) => format!("agent@{app}"),
                None => "agent".to_string(),
            },
        }
    }
}

/// Captured outcome of an executed event; set once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventResult {
    Success { output: Value },
    Failure { error: SimError },
}

impl EventResult {
    pub fn output(&self) -> Option<&Value> {
        match self {
            EventResult::Success { output } => Some(output),
            EventResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&SimError> {
        match self {
            EventResult::Success { .. } => None,
            EventResult::Failure { error } => Some(error),
        }
    }
}
