use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Failure categories surfaced on events, trace entries and run reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    GraphCycle,
    Capability,
    Timeout,
    DeadlineExceeded,
    ResourceOwnership,
    UpstreamFailed,
    Cancelled,
    InvalidArgument,
    NotFound,
    Busy,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::GraphCycle => "GraphCycleError",
            ErrorKind::Capability => "CapabilityError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::ResourceOwnership => "ResourceOwnershipError",
            ErrorKind::UpstreamFailed => "UpstreamFailed",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Busy => "Busy",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared error type for the harness crates.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct SimError {
    kind: ErrorKind,
    message: String,
}

impl SimError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capability, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn ownership(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceOwnership, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type SimResult<T> = Result<T, SimError>;

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn sequential(seq: usize) -> Self {
        Self(format!("evt-{seq:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable app identity used for lookup.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppName(pub String);

impl AppName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A capability invocation bound to its arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub app: AppName,
    pub capability: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(app: impl Into<AppName>, capability: impl Into<String>, args: Value) -> Self {
        Self {
            app: app.into(),
            capability: capability.into(),
            args: normalize_args(args),
        }
    }

    /// Structural equality on target and arguments; a missing argument object
    /// equals an empty one.
    pub fn is_equivalent(&self, other: &ToolCall) -> bool {
        self.app == other.app
            && self.capability == other.capability
            && normalize_args(self.args.clone()) == normalize_args(other.args.clone())
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.capability)
    }
}

fn normalize_args(args: Value) -> Value {
    match args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

impl From<String> for AppName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&AppName> for AppName {
    fn from(value: &AppName) -> Self {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_display_uses_kind_names() {
        let err = SimError::timeout("agent did not answer");
        assert_eq!(err.to_string(), "TimeoutError: agent did not answer");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn tool_call_equivalence_ignores_null_args() {
        let a = ToolCall::new("Mail", "list_inbox", Value::Null);
        let b = ToolCall::new("Mail", "list_inbox", json!({}));
        assert!(a.is_equivalent(&b));

        let c = ToolCall::new("Mail", "read_email", json!({ "id": "m-1" }));
        let d = ToolCall::new("Mail", "read_email", json!({ "id": "m-2" }));
        assert!(!c.is_equivalent(&d));
    }

    #[test]
    fn sequential_ids_sort_in_creation_order() {
        let mut ids = vec![EventId::sequential(10), EventId::sequential(2)];
        ids.sort();
        assert_eq!(ids[0].as_str(), "evt-0002");
    }
}
