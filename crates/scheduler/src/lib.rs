pub mod agent;
pub mod clock;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod runtime;

pub use agent::{
    Agent, AgentDecision, AgentRequest, AgentTurn, ChannelAgent, OracleAgent, ScriptedAgent,
    SilentAgent, ToolSchema,
};
pub use error::SchedulerError;
pub use executor::AppTable;
pub use metrics::SchedulerMetricsSnapshot;
pub use model::{ClockMode, SchedulerConfig};
pub use orchestrator::Scheduler;
pub use report::{AgentResult, EventRecord, OracleExpectation, RunReport, RunStatus};
