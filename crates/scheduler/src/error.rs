use thiserror::Error;

use agentsim_core_types::{AppName, ErrorKind, EventId, SimError};

/// Errors fatal to a whole run; per-event failures are recorded on the event.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("event {event} targets unknown app {app}")]
    UnknownApp { event: EventId, app: AppName },
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for SimError {
    fn from(value: SchedulerError) -> Self {
        let kind = match &value {
            SchedulerError::UnknownApp { .. } => ErrorKind::NotFound,
            SchedulerError::InvalidConfig(_) => ErrorKind::InvalidArgument,
            SchedulerError::Internal(_) => ErrorKind::Internal,
        };
        SimError::new(kind, value.to_string())
    }
}
