use thiserror::Error;

use agentsim_core_types::{AppName, ErrorKind, EventId, SimError};
use agentsim_registry::RegistryError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("dependency {event} -> {predecessor} would create a cycle")]
    Cycle {
        event: EventId,
        predecessor: EventId,
    },
    #[error("unknown event {0}")]
    UnknownEvent(EventId),
    #[error("unknown app {0}")]
    UnknownApp(AppName),
    #[error("event {0} already has predecessors and cannot be a graph root")]
    InvalidRoot(EventId),
    #[error("delay must be a finite, non-negative number of seconds (got {0})")]
    InvalidDelay(f64),
    #[error("agent event {0} hint targets a different app than its slot")]
    HintMismatch(EventId),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Cycle { .. } => ErrorKind::GraphCycle,
            GraphError::UnknownEvent(_) | GraphError::UnknownApp(_) => ErrorKind::NotFound,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

impl From<GraphError> for SimError {
    fn from(value: GraphError) -> Self {
        SimError::new(value.kind(), value.to_string())
    }
}
