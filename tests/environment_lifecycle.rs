use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use agentsim::{AgentDecision, ChannelAgent, Environment, EnvironmentError, SchedulerConfig};
use agentsim_apps::agent_ui::{self, Sender, UiState};
use agentsim_apps::mail::{self, MailState};
use agentsim_event_graph::EventGraph;

fn ui_env() -> Environment {
    let env = Environment::default();
    assert_ok!(env.add_app(Arc::new(agent_ui::agent_user_interface().unwrap())));
    env
}

fn greeting_graph(env: &Environment) -> EventGraph {
    let mut builder = env.graph_builder();
    let ask = builder
        .on(agent_ui::NAME)
        .call("send_message_to_agent", json!({ "content": "are you there?" }))
        .unwrap()
        .id();
    builder
        .on(agent_ui::NAME)
        .expect_agent("send_message_to_user", json!({ "content": "yes" }))
        .unwrap()
        .depends_on(Some(&ask), Duration::from_secs(1))
        .unwrap();
    builder.finalize().unwrap()
}

fn messages(env: &Environment) -> UiState {
    env.app(agent_ui::NAME)
        .unwrap()
        .state_as::<UiState>()
        .unwrap()
}

#[tokio::test]
async fn snapshot_restore_and_reset_round_trip_app_state() {
    let env = ui_env();
    assert_ok!(env.start().await);
    let before = assert_ok!(env.snapshot());

    let graph = greeting_graph(&env);
    let report = assert_ok!(
        env.run(
            &graph,
            Arc::new(agentsim::OracleAgent::new()),
            SchedulerConfig::default(),
            CancellationToken::new(),
        )
        .await
    );
    assert!(report.all_terminal());
    let after_run = messages(&env);
    assert_eq!(after_run.messages.len(), 2);
    assert_eq!(
        after_run.last_from(Sender::Agent).map(|msg| msg.content.as_str()),
        Some("yes")
    );

    let during = assert_ok!(env.snapshot());
    assert_ok!(env.restore(&before).await);
    assert!(messages(&env).messages.is_empty());
    assert_ok!(env.restore(&during).await);
    assert_eq!(messages(&env).messages.len(), 2);

    assert_ok!(env.reset().await);
    assert!(messages(&env).messages.is_empty());
    assert_ok!(env.shutdown().await);
}

#[tokio::test]
async fn environment_refuses_changes_while_running() {
    let env = ui_env();
    let graph = greeting_graph(&env);
    let (agent, mut turns) = ChannelAgent::new(1);

    let run = env.run(
        &graph,
        Arc::new(agent),
        SchedulerConfig::default(),
        CancellationToken::new(),
    );
    let interfere = async {
        let turn = turns.recv().await.expect("agent turn");
        assert!(env.is_running());
        let busy = assert_err!(env.reset().await);
        assert!(matches!(busy, EnvironmentError::Busy(_)));
        let second = assert_err!(
            env.run(
                &graph,
                Arc::new(agentsim::SilentAgent),
                SchedulerConfig::default(),
                CancellationToken::new(),
            )
            .await
        );
        assert!(matches!(second, EnvironmentError::Busy(_)));
        turn.respond(Ok(AgentDecision::NoAction));
    };

    let (report, ()) = tokio::join!(run, interfere);
    let report = assert_ok!(report);
    assert!(report.all_terminal());
    assert!(!env.is_running());
    assert_ok!(env.reset().await);
}

#[tokio::test]
async fn shared_browser_outlives_borrowing_apps_until_shutdown() {
    let env = Environment::default();
    let lease = assert_ok!(env.shared_browser("shared"));
    let app = assert_ok!(mail::mail_app(MailState::new("me@example.test"), lease));
    assert_ok!(env.add_app(Arc::new(app)));
    assert_ok!(env.start().await);

    let view = env.app(mail::NAME).unwrap();
    assert!(!view.owns_resources());
    let inbox = assert_ok!(view.query("list_inbox", &json!({})));
    assert_eq!(inbox, json!([]));

    assert_ok!(env.shutdown().await);
    let stats = env.state_center().stats();
    assert!(stats.lifecycle_events >= 3);
}

#[tokio::test]
async fn trace_lands_in_a_fresh_directory() {
    let env = ui_env();
    let graph = greeting_graph(&env);
    assert_ok!(
        env.run(
            &graph,
            Arc::new(agentsim::OracleAgent::new()),
            SchedulerConfig::default(),
            CancellationToken::new(),
        )
        .await
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("trace.json");
    assert_ok!(env.write_trace(&path));
    let raw = std::fs::read_to_string(&path).unwrap();
    let trace: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(trace["stats"].is_object());
}
