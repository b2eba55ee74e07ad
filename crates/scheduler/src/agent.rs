use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use agentsim_core_types::{AppName, EventId, RunId, SimError, ToolCall};

/// Capability schema offered to the agent for one app.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSchema {
    pub app: AppName,
    pub schema: Value,
}

/// What the scheduler hands an agent when an `AgentAction` becomes ready.
#[derive(Clone, Debug, Serialize)]
pub struct AgentRequest {
    pub run: RunId,
    pub event: EventId,
    pub label: Option<String>,
    pub app: Option<AppName>,
    /// Reference action, if the scenario provides one.
    pub hint: Option<ToolCall>,
    pub tools: Vec<ToolSchema>,
    /// Other agent events ready at the same moment.
    pub ready: Vec<EventId>,
    /// Run clock offset at readiness.
    pub clock_ms: u64,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AgentDecision {
    Act(ToolCall),
    NoAction,
}

/// External actor resolving `AgentAction` events.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn decide(&self, request: AgentRequest) -> Result<AgentDecision, SimError>;
}

/// Replays each slot's hint; slots without a hint take no action.
#[derive(Clone, Debug, Default)]
pub struct OracleAgent {
    latency: Duration,
}

impl OracleAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Agent for OracleAgent {
    async fn decide(&self, request: AgentRequest) -> Result<AgentDecision, SimError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(match request.hint {
            Some(call) => AgentDecision::Act(call),
            None => AgentDecision::NoAction,
        })
    }
}

/// Never answers, so every agent event runs into its timeout.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentAgent;

#[async_trait]
impl Agent for SilentAgent {
    async fn decide(&self, _request: AgentRequest) -> Result<AgentDecision, SimError> {
        std::future::pending().await
    }
}

/// Fixed decisions keyed by event label or event id.
#[derive(Clone, Debug, Default)]
pub struct ScriptedAgent {
    script: HashMap<String, AgentDecision>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, key: impl Into<String>, decision: AgentDecision) -> Self {
        self.script.insert(key.into(), decision);
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn decide(&self, request: AgentRequest) -> Result<AgentDecision, SimError> {
        let by_label = request
            .label
            .as_deref()
            .and_then(|label| self.script.get(label));
        let decision = by_label.or_else(|| self.script.get(request.event.as_str()));
        Ok(decision.cloned().unwrap_or(AgentDecision::NoAction))
    }
}

/// One pending decision forwarded to an external agent loop.
#[derive(Debug)]
pub struct AgentTurn {
    pub request: AgentRequest,
    reply: oneshot::Sender<Result<AgentDecision, SimError>>,
}

impl AgentTurn {
    /// Sends the decision back; returns false when the scheduler stopped waiting.
    pub fn respond(self, decision: Result<AgentDecision, SimError>) -> bool {
        self.reply.send(decision).is_ok()
    }
}

/// Bridges the scheduler to an agent loop running elsewhere.
#[derive(Clone, Debug)]
pub struct ChannelAgent {
    tx: mpsc::Sender<AgentTurn>,
}

impl ChannelAgent {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AgentTurn>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Agent for ChannelAgent {
    async fn decide(&self, request: AgentRequest) -> Result<AgentDecision, SimError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(AgentTurn { request, reply })
            .await
            .map_err(|_| SimError::internal("agent loop is gone"))?;
        response
            .await
            .map_err(|_| SimError::internal("agent loop dropped the turn"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(label: Option<&str>, hint: Option<ToolCall>) -> AgentRequest {
        AgentRequest {
            run: RunId::new(),
            event: EventId::sequential(3),
            label: label.map(str::to_string),
            app: None,
            hint,
            tools: Vec::new(),
            ready: Vec::new(),
            clock_ms: 0,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn oracle_replays_hint() {
        let hint = ToolCall::new("Mail", "list_inbox", json!({}));
        let decision = OracleAgent::new()
            .decide(request(None, Some(hint.clone())))
            .await
            .unwrap();
        assert_eq!(decision, AgentDecision::Act(hint));
        let decision = OracleAgent::new().decide(request(None, None)).await.unwrap();
        assert_eq!(decision, AgentDecision::NoAction);
    }

    #[tokio::test]
    async fn scripted_prefers_label_over_id() {
        let by_label = ToolCall::new("Mail", "open_inbox", json!({}));
        let agent = ScriptedAgent::new()
            .on("inbox", AgentDecision::Act(by_label.clone()))
            .on("evt-0003", AgentDecision::NoAction);
        let decision = agent.decide(request(Some("inbox"), None)).await.unwrap();
        assert_eq!(decision, AgentDecision::Act(by_label));
        let decision = agent.decide(request(Some("other"), None)).await.unwrap();
        assert_eq!(decision, AgentDecision::NoAction);
    }

    #[tokio::test]
    async fn channel_agent_round_trips_through_loop() {
        let (agent, mut turns) = ChannelAgent::new(4);
        let responder = tokio::spawn(async move {
            let turn = turns.recv().await.unwrap();
            assert_eq!(turn.request.event, EventId::sequential(3));
            turn.respond(Ok(AgentDecision::NoAction))
        });
        let decision = agent.decide(request(None, None)).await.unwrap();
        assert_eq!(decision, AgentDecision::NoAction);
        assert!(responder.await.unwrap());
    }

    #[tokio::test]
    async fn channel_agent_fails_when_loop_is_gone() {
        let (agent, turns) = ChannelAgent::new(1);
        drop(turns);
        let err = agent.decide(request(None, None)).await.unwrap_err();
        assert_eq!(err.kind(), agentsim_core_types::ErrorKind::Internal);
    }
}
