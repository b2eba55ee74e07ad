//! Mail app driving a browser that the scenario owns and shares.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agentsim_apps::agent_ui;
use agentsim_apps::mail::{self, Email, Folder, MailState};
use agentsim_event_graph::{EventGraph, EventStatus, GraphBuilder, GraphError};

use crate::environment::Environment;
use crate::errors::ScenarioError;
use crate::scenario::Scenario;
use crate::validator::{ValidationInput, ValidationResult};

pub const ID: &str = "gmail_browser";
pub const BROWSER: &str = "scenario-browser";
pub const OPEN_INBOX: &str = "open_inbox";

const TASK: &str = "Please navigate to Gmail and check the inbox.";

#[derive(Clone, Copy, Debug, Default)]
pub struct GmailBrowserScenario;

impl GmailBrowserScenario {
    fn mailbox() -> MailState {
        MailState::new("me@example.test")
            .with_email(Email {
                id: "m-1".into(),
                from: "team@example.test".into(),
                to: vec!["me@example.test".into()],
                subject: "Welcome to your inbox".into(),
                body: "Everything you need is here.".into(),
                folder: Folder::Inbox,
            })
            .with_email(Email {
                id: "m-2".into(),
                from: "calendar@example.test".into(),
                to: vec!["me@example.test".into()],
                subject: "Standup moved to 10:00".into(),
                body: "See the updated invite.".into(),
                folder: Folder::Inbox,
            })
    }

    fn events(builder: &mut GraphBuilder) -> Result<(), GraphError> {
        let task = builder
            .on(agent_ui::NAME)
            .call("send_message_to_agent", json!({ "content": TASK }))?
            .depends_on(None, Duration::from_secs(2))?
            .id();
        builder
            .on(mail::NAME)
            .expect_agent("open_inbox", json!({}))?
            .label(OPEN_INBOX)
            .depends_on(Some(&task), Duration::from_secs(1))?;
        Ok(())
    }
}

impl Scenario for GmailBrowserScenario {
    fn id(&self) -> &str {
        ID
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs(120))
    }

    fn user_prompt(&self) -> Option<&str> {
        Some("Navigate to Gmail and verify that you can see the inbox. Describe what you see.")
    }

    fn init_and_populate_apps(&self, env: &Environment) -> Result<(), ScenarioError> {
        let browser = env.shared_browser(BROWSER)?;
        let ui = agent_ui::agent_user_interface().map_err(|err| ScenarioError::registry(ID, err))?;
        let mail = mail::mail_app(Self::mailbox(), browser)
            .map_err(|err| ScenarioError::registry(ID, err))?;
        env.add_app(Arc::new(ui))?;
        env.add_app(Arc::new(mail))?;
        Ok(())
    }

    fn build_events_flow(&self, env: &Environment) -> Result<EventGraph, ScenarioError> {
        let mut builder = env.graph_builder();
        Self::events(&mut builder).map_err(|err| ScenarioError::graph(ID, err))?;
        builder.finalize().map_err(|err| ScenarioError::graph(ID, err))
    }

    fn validate(&self, input: &ValidationInput<'_>) -> ValidationResult {
        match input.report.by_label(OPEN_INBOX) {
            Some(record) if record.status == EventStatus::Completed => {
                ValidationResult::pass().with_feedback("Gmail inbox opened successfully")
            }
            Some(record) => ValidationResult::fail(format!(
                "agent did not open the inbox ({:?}{})",
                record.status,
                record
                    .error()
                    .map(|err| format!(": {err}"))
                    .unwrap_or_default()
            )),
            None => ValidationResult::errored("open_inbox event missing from report"),
        }
    }
}
