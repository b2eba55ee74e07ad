use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use agentsim_registry::{CapabilitySpec, ParamSpec, ParamType, RegistryError};

use crate::stateful::{decode_args, to_output, StatefulApp};

pub const NAME: &str = "AgentUserInterface";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Agent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: u64,
    pub sender: Sender,
    pub content: String,
}

/// Conversation between the user proxy and the agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    pub messages: Vec<UiMessage>,
}

impl UiState {
    fn push(&mut self, sender: Sender, content: String) -> u64 {
        let id = self.messages.len() as u64 + 1;
        self.messages.push(UiMessage {
            id,
            sender,
            content,
        });
        id
    }

    pub fn last_from(&self, sender: Sender) -> Option<&UiMessage> {
        self.messages.iter().rev().find(|msg| msg.sender == sender)
    }
}

pub type AgentUserInterface = StatefulApp<UiState>;

#[derive(Deserialize)]
struct ContentArgs {
    content: String,
}

pub fn agent_user_interface() -> Result<AgentUserInterface, RegistryError> {
    StatefulApp::builder(NAME, UiState::default(), ())
        .write(
            CapabilitySpec::write("send_message_to_agent")
                .describe("Send a message from the user to the agent")
                .param(ParamSpec::required("content", ParamType::String)),
            |state, _, args| {
                let ContentArgs { content } = decode_args(args)?;
                Ok(json!({ "message_id": state.push(Sender::User, content) }))
            },
        )
        .write(
            CapabilitySpec::write("send_message_to_user")
                .describe("Reply to the user")
                .param(ParamSpec::required("content", ParamType::String)),
            |state, _, args| {
                let ContentArgs { content } = decode_args(args)?;
                Ok(json!({ "message_id": state.push(Sender::Agent, content) }))
            },
        )
        .read(CapabilitySpec::read("list_messages"), |state, _, _| {
            to_output(&state.messages)
        })
        .read(
            CapabilitySpec::read("get_last_message_from_user"),
            |state, _, _| {
                Ok(state
                    .last_from(Sender::User)
                    .map(|msg| json!(msg.content))
                    .unwrap_or(Value::Null))
            },
        )
        .build()
}
