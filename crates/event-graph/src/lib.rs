pub mod builder;
pub mod errors;
pub mod graph;
pub mod model;

pub use builder::{Capture, EventDraft, GraphBuilder};
pub use errors::GraphError;
pub use graph::EventGraph;
pub use model::{
    AgentSlot, Event, EventKind, EventResult, EventStatus, EventTarget, FailurePolicy,
};
