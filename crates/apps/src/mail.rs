use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use agentsim_core_types::{SimError, SimResult};
use agentsim_registry::{CapabilitySpec, ParamSpec, ParamType};

use crate::browser::{BrowserRequest, BrowserSession};
use crate::resource::ResourceLease;
use crate::stateful::{decode_args, to_output, StatefulApp};

pub const NAME: &str = "Mail";
pub const INBOX_URL: &str = "https://mail.example.test/inbox";

const SEARCH_ENGINES: [&str; 3] = ["duckduckgo", "google", "bing"];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Folder {
    Inbox,
    Sent,
    Archive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub folder: Folder,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MailState {
    pub account: String,
    pub emails: Vec<Email>,
}

impl MailState {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            emails: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: Email) -> Self {
        self.emails.push(email);
        self
    }

    pub fn find(&self, id: &str) -> Option<&Email> {
        self.emails.iter().find(|email| email.id == id)
    }

    pub fn in_folder(&self, folder: Folder) -> impl Iterator<Item = &Email> {
        self.emails.iter().filter(move |email| email.folder == folder)
    }

    fn next_id(&self) -> String {
        format!("m-{}", self.emails.len() + 1)
    }
}

/// Gmail simulation that navigates a browser session it either owns or borrows.
pub type MailApp = StatefulApp<MailState, ResourceLease<BrowserSession>>;

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_engine")]
    engine: String,
}

fn default_engine() -> String {
    "duckduckgo".to_string()
}

#[derive(Deserialize)]
struct EmailIdArgs {
    email_id: String,
}

#[derive(Deserialize)]
struct SendArgs {
    to: Vec<String>,
    subject: String,
    #[serde(default)]
    body: String,
}

#[derive(Serialize)]
struct InboxEntry<'a> {
    id: &'a str,
    from: &'a str,
    subject: &'a str,
}

/// Search URL for a supported engine, with the query form-encoded.
pub fn search_url(engine: &str, query: &str) -> SimResult<String> {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    match engine.to_lowercase().as_str() {
        "duckduckgo" => Ok(format!("https://duckduckgo.com/?q={encoded}")),
        "google" => Ok(format!("https://www.google.com/search?q={encoded}&udm=14")),
        "bing" => Ok(format!("https://www.bing.com/search?q={encoded}")),
        _ => Err(SimError::capability(format!(
            "unsupported search engine: {engine}. Options: {}",
            SEARCH_ENGINES.join(", ")
        ))),
    }
}

pub fn mail_app(
    state: MailState,
    browser: ResourceLease<BrowserSession>,
) -> Result<MailApp, agentsim_registry::RegistryError> {
    StatefulApp::builder(NAME, state, browser)
        .read(
            CapabilitySpec::read("search")
                .describe("Search the web from the mail browser")
                .param(ParamSpec::required("query", ParamType::String))
                .param(ParamSpec::optional("engine", ParamType::String)),
            |_, browser, args| {
                let SearchArgs { query, engine } = decode_args(args)?;
                let url = search_url(&engine, &query)?;
                let view = browser.call(BrowserRequest::Navigate { url })?;
                let memory = format!("Searched {engine} for '{query}'");
                info!(engine = %engine, "{memory}");
                Ok(json!({ "memory": memory, "url": view.url }))
            },
        )
        .read(
            CapabilitySpec::read("open_inbox").describe("Navigate the browser to the inbox"),
            |state, browser, _| {
                let view = browser.call(BrowserRequest::Navigate {
                    url: INBOX_URL.to_string(),
                })?;
                Ok(json!({
                    "url": view.url,
                    "unread": state.in_folder(Folder::Inbox).count(),
                }))
            },
        )
        .read(CapabilitySpec::read("list_inbox"), |state, _, _| {
            let entries: Vec<InboxEntry<'_>> = state
                .in_folder(Folder::Inbox)
                .map(|email| InboxEntry {
                    id: &email.id,
                    from: &email.from,
                    subject: &email.subject,
                })
                .collect();
            to_output(&entries)
        })
        .read(
            CapabilitySpec::read("read_email")
                .param(ParamSpec::required("email_id", ParamType::String)),
            |state, _, args| {
                let EmailIdArgs { email_id } = decode_args(args)?;
                let email = state
                    .find(&email_id)
                    .ok_or_else(|| SimError::capability(format!("no email {email_id}")))?;
                to_output(email)
            },
        )
        .write(
            CapabilitySpec::write("send_email")
                .param(ParamSpec::required("to", ParamType::Array))
                .param(ParamSpec::required("subject", ParamType::String))
                .param(ParamSpec::optional("body", ParamType::String)),
            |state, _, args| {
                let SendArgs { to, subject, body } = decode_args(args)?;
                if to.is_empty() {
                    return Err(SimError::capability("send_email needs at least one recipient"));
                }
                let id = state.next_id();
                state.emails.push(Email {
                    id: id.clone(),
                    from: state.account.clone(),
                    to,
                    subject,
                    body,
                    folder: Folder::Sent,
                });
                Ok(json!({ "email_id": id }))
            },
        )
        .write(
            CapabilitySpec::write("archive_email")
                .param(ParamSpec::required("email_id", ParamType::String)),
            |state, _, args| {
                let EmailIdArgs { email_id } = decode_args(args)?;
                let email = state
                    .emails
                    .iter_mut()
                    .find(|email| email.id == email_id)
                    .ok_or_else(|| SimError::capability(format!("no email {email_id}")))?;
                email.folder = Folder::Archive;
                Ok(json!({ "email_id": email_id, "folder": Folder::Archive }))
            },
        )
        .build()
}

/// Mail app that spawns and owns its own browser session.
pub fn mail_app_with_own_browser(
    state: MailState,
    resource_timeout: Duration,
) -> SimResult<MailApp> {
    let worker = BrowserSession::spawn("mail-browser", resource_timeout)?;
    mail_app(state, ResourceLease::owned(worker)).map_err(|err| err.into_sim_error(NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use agentsim_core_types::ErrorKind;
    use serde_json::Value;

    fn seeded() -> MailState {
        MailState::new("me@example.test")
            .with_email(Email {
                id: "m-1".into(),
                from: "boss@example.test".into(),
                to: vec!["me@example.test".into()],
                subject: "Quarterly plan".into(),
                body: "See attached".into(),
                folder: Folder::Inbox,
            })
            .with_email(Email {
                id: "m-2".into(),
                from: "news@example.test".into(),
                to: vec!["me@example.test".into()],
                subject: "Weekly digest".into(),
                body: "Top stories".into(),
                folder: Folder::Inbox,
            })
    }

    #[test]
    fn search_urls_encode_queries() {
        assert_eq!(
            search_url("Google", "rust tokio").unwrap(),
            "https://www.google.com/search?q=rust+tokio&udm=14"
        );
        let err = search_url("altavista", "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert!(err.message().contains("duckduckgo, google, bing"));
    }

    #[test]
    fn owned_browser_serves_search_and_inbox() {
        let app = mail_app_with_own_browser(seeded(), Duration::from_secs(5)).unwrap();
        assert!(app.owns_resources());
        app.start().unwrap();

        let out = app
            .invoke("search", &json!({ "query": "rust", "engine": "bing" }))
            .unwrap();
        assert_eq!(out["url"], "https://www.bing.com/search?q=rust");

        let out = app.invoke("open_inbox", &Value::Null).unwrap();
        assert_eq!(out["url"], INBOX_URL);
        assert_eq!(out["unread"], 2);
        app.shutdown().unwrap();
    }

    #[test]
    fn archive_moves_email_out_of_inbox() {
        let app = mail_app_with_own_browser(seeded(), Duration::from_secs(5)).unwrap();
        app.invoke("archive_email", &json!({ "email_id": "m-2" }))
            .unwrap();
        let inbox = app.invoke("list_inbox", &Value::Null).unwrap();
        assert_eq!(inbox.as_array().map(Vec::len), Some(1));
        assert!(app
            .read_state(|state| state.find("m-2").map(|email| email.folder))
            .is_some_and(|folder| folder == Folder::Archive));

        let err = app
            .invoke("archive_email", &json!({ "email_id": "m-9" }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn borrowed_browser_is_left_running_on_shutdown() {
        let owner = ResourceLease::owned(BrowserSession::spawn("shared", Duration::from_secs(5)).unwrap());
        owner.start().unwrap();
        let app = mail_app(seeded(), owner.lend()).unwrap();
        assert!(!app.owns_resources());

        app.shutdown().unwrap();
        let view = owner.call(BrowserRequest::Summary).unwrap();
        assert_eq!(view.stops, 0);
        assert!(app.invoke("open_inbox", &Value::Null).is_ok());
    }
}
