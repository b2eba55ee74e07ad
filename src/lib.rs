//! agentsim library
//!
//! Scenario harness around the event-dependency scheduler: environments that
//! own apps and shared resources, scenario definitions and their validation,
//! and the configuration consumed by the `agentsim` binary.

pub mod cli;
pub mod config;
pub mod environment;
pub mod errors;
pub mod scenario;
pub mod scenarios;
pub mod validator;

pub use config::{Config, LogFormat};
pub use environment::{AppView, EnvSnapshot, Environment};
pub use errors::{ConfigError, EnvironmentError, ScenarioError};
pub use scenario::{Scenario, ScenarioOutcome, ScenarioRegistry, ScenarioRunner};
pub use validator::{ValidationInput, ValidationResult, Validator};

pub use agentsim_scheduler::{
    Agent, AgentDecision, ChannelAgent, ClockMode, OracleAgent, RunReport, RunStatus,
    SchedulerConfig, ScriptedAgent, SilentAgent,
};
