use thiserror::Error;

use agentsim_core_types::{ErrorKind, SimError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability name must not be empty")]
    EmptyName,
    #[error("capability '{0}' registered twice")]
    DuplicateCapability(String),
    #[error("parameter '{param}' declared twice on '{capability}'")]
    DuplicateParam { capability: String, param: String },
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),
    #[error("invalid arguments for '{capability}': {reason}")]
    InvalidArguments { capability: String, reason: String },
}

impl RegistryError {
    pub fn into_sim_error(self, app: &str) -> SimError {
        let kind = match self {
            RegistryError::UnknownCapability(_) => ErrorKind::NotFound,
            _ => ErrorKind::InvalidArgument,
        };
        SimError::new(kind, format!("{app}: {self}"))
    }
}
