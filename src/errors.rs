//! Error types for the environment, configuration and scenario layers.

use std::path::PathBuf;

use thiserror::Error;

use agentsim_core_types::{AppName, ErrorKind, SimError};
use agentsim_event_graph::GraphError;
use agentsim_registry::RegistryError;
use agentsim_scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("cannot {0} while a run is active")]
    Busy(&'static str),
    #[error("app {0} is already registered")]
    DuplicateApp(AppName),
    #[error("unknown app {0}")]
    UnknownApp(AppName),
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("trace export failed: {0}")]
    Trace(#[from] std::io::Error),
}

impl From<EnvironmentError> for SimError {
    fn from(value: EnvironmentError) -> Self {
        match value {
            EnvironmentError::Sim(err) => err,
            EnvironmentError::Scheduler(err) => err.into(),
            EnvironmentError::Busy(_) => SimError::new(ErrorKind::Busy, value.to_string()),
            EnvironmentError::DuplicateApp(_) => SimError::invalid_argument(value.to_string()),
            EnvironmentError::UnknownApp(_) => SimError::not_found(value.to_string()),
            EnvironmentError::Trace(_) => SimError::internal(value.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid override {key}: {message}")]
    Override { key: String, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unknown scenario {0}")]
    Unknown(String),
    #[error("scenario {0} is already registered")]
    Duplicate(String),
    #[error("scenario {id} failed to build its event graph: {source}")]
    Graph { id: String, source: GraphError },
    #[error("scenario {id} failed to register app capabilities: {source}")]
    Registry { id: String, source: RegistryError },
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

impl ScenarioError {
    pub fn graph(id: &str, source: GraphError) -> Self {
        Self::Graph {
            id: id.to_string(),
            source,
        }
    }

    pub fn registry(id: &str, source: RegistryError) -> Self {
        Self::Registry {
            id: id.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScenarioError::Unknown(_) => ErrorKind::NotFound,
            ScenarioError::Duplicate(_) | ScenarioError::Registry { .. } => {
                ErrorKind::InvalidArgument
            }
            ScenarioError::Graph { source, .. } => source.kind(),
            ScenarioError::Environment(err) => match err {
                EnvironmentError::Busy(_) => ErrorKind::Busy,
                EnvironmentError::Sim(sim) => sim.kind(),
                _ => ErrorKind::Internal,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsim_core_types::EventId;

    #[test]
    fn busy_maps_to_busy_kind() {
        let err: SimError = EnvironmentError::Busy("reset").into();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(err.message().contains("cannot reset while a run is active"));
    }

    #[test]
    fn graph_cycles_keep_their_kind() {
        let source = GraphError::Cycle {
            event: EventId::sequential(1),
            predecessor: EventId::sequential(2),
        };
        let err = ScenarioError::graph("loop", source);
        assert_eq!(err.kind(), ErrorKind::GraphCycle);
    }
}
