use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use agentsim::{AgentDecision, ChannelAgent, Environment, OracleAgent, RunStatus, SchedulerConfig};
use agentsim_apps::{agent_ui, to_output, AppExtension, StatefulApp};
use agentsim_core_types::ErrorKind;
use agentsim_event_graph::EventStatus;
use agentsim_registry::CapabilitySpec;

const HOLD: Duration = Duration::from_millis(60);

/// Tracks handler overlap; a clash is a read running alongside a write.
#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    readers: AtomicUsize,
    writing: AtomicBool,
    clashes: AtomicUsize,
}

impl Gauge {
    fn hold(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(HOLD);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn read(&self) {
        self.readers.fetch_add(1, Ordering::SeqCst);
        self.check(self.writing.load(Ordering::SeqCst));
        self.hold();
        self.check(self.writing.load(Ordering::SeqCst));
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    fn write(&self) {
        self.writing.store(true, Ordering::SeqCst);
        self.check(self.readers.load(Ordering::SeqCst) > 0);
        self.hold();
        self.check(self.readers.load(Ordering::SeqCst) > 0);
        self.writing.store(false, Ordering::SeqCst);
    }

    fn check(&self, clash: bool) {
        if clash {
            self.clashes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Default)]
struct Meter(Arc<Gauge>);

impl AppExtension for Meter {}

fn meter_env() -> (Environment, Arc<Gauge>) {
    let meter = Meter::default();
    let gauge = meter.0.clone();
    let app = StatefulApp::builder("Meter", 0u64, meter)
        .read(CapabilitySpec::read("peek"), |count, meter, _| {
            meter.0.read();
            to_output(count)
        })
        .write(CapabilitySpec::write("bump"), |count, meter, _| {
            meter.0.write();
            *count += 1;
            to_output(&*count)
        })
        .build()
        .unwrap();
    let env = Environment::default();
    env.add_app(Arc::new(app)).unwrap();
    (env, gauge)
}

async fn run_all(env: &Environment, capability: &str, copies: usize) -> agentsim::RunReport {
    let mut builder = env.graph_builder();
    for _ in 0..copies {
        builder.on("Meter").call(capability, json!({})).unwrap();
    }
    let graph = builder.finalize().unwrap();
    env.run(
        &graph,
        Arc::new(OracleAgent::new()),
        SchedulerConfig::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_on_one_app_overlap() {
    let (env, gauge) = meter_env();
    let report = run_all(&env, "peek", 3).await;
    assert_eq!(report.count(EventStatus::Completed), 3);
    assert!(gauge.peak.load(Ordering::SeqCst) > 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_on_one_app_never_overlap() {
    let (env, gauge) = meter_env();
    let report = run_all(&env, "bump", 3).await;
    assert_eq!(report.count(EventStatus::Completed), 3);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
    let snapshot = env.snapshot().unwrap();
    assert_eq!(snapshot.app("Meter").unwrap().state, json!(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_never_overlap_a_write() {
    let (env, gauge) = meter_env();
    let mut builder = env.graph_builder();
    let first = builder.on("Meter").call("peek", json!({})).unwrap().id();
    builder.on("Meter").call("bump", json!({})).unwrap();
    let last = builder.on("Meter").call("peek", json!({})).unwrap().id();
    let graph = builder.finalize().unwrap();

    let report = env
        .run(
            &graph,
            Arc::new(OracleAgent::new()),
            SchedulerConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.count(EventStatus::Completed), 3);
    assert_eq!(gauge.clashes.load(Ordering::SeqCst), 0);
    // each read saw the counter either wholly before or wholly after the bump
    for id in [&first, &last] {
        let seen = report.event(id).unwrap().output().cloned();
        assert!(seen == Some(json!(0)) || seen == Some(json!(1)), "{id}: {seen:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oracle_checks_run_alone_on_their_app() {
    let (env, gauge) = meter_env();
    let mut builder = env.graph_builder();
    builder.on("Meter").call("peek", json!({})).unwrap();
    let check = builder
        .on("Meter")
        .call("peek", json!({}))
        .unwrap()
        .oracle()
        .id();
    builder.on("Meter").call("peek", json!({})).unwrap();
    let graph = builder.finalize().unwrap();

    let report = env
        .run(
            &graph,
            Arc::new(OracleAgent::new()),
            SchedulerConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.count(EventStatus::Completed), 3);
    assert!(report.event(&check).unwrap().executed.is_some());
    // the two plain reads may share the app, the oracle check never does
    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn join_waits_for_slowest_predecessor() {
    let (env, _) = meter_env();
    let mut builder = env.graph_builder();
    let fast = builder
        .on("Meter")
        .call("bump", json!({}))
        .unwrap()
        .depends_on(None, Duration::from_secs(1))
        .unwrap()
        .id();
    let slow = builder
        .on("Meter")
        .call("bump", json!({}))
        .unwrap()
        .depends_on(None, Duration::from_secs(3))
        .unwrap()
        .id();
    let join = builder
        .on("Meter")
        .call("peek", json!({}))
        .unwrap()
        .depends_on_all(&[fast.clone(), slow.clone()], Duration::from_secs(1))
        .unwrap()
        .id();
    let graph = builder.finalize().unwrap();

    let report = env
        .run(
            &graph,
            Arc::new(OracleAgent::new()),
            SchedulerConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let fast = report.event(&fast).unwrap();
    let slow = report.event(&slow).unwrap();
    let join = report.event(&join).unwrap();
    assert_eq!(fast.ready_ms, Some(1000));
    assert_eq!(slow.ready_ms, Some(3000));
    let latest = fast.finished_ms.unwrap().max(slow.finished_ms.unwrap());
    assert_eq!(join.ready_ms, Some(latest + 1000));
    assert_eq!(join.output(), Some(&json!(2)));
}

#[tokio::test]
async fn cancelling_mid_run_skips_what_has_not_started() {
    let env = Environment::default();
    env.add_app(Arc::new(agent_ui::agent_user_interface().unwrap()))
        .unwrap();
    let mut builder = env.graph_builder();
    let ask = builder
        .on(agent_ui::NAME)
        .call("send_message_to_agent", json!({ "content": "hello?" }))
        .unwrap()
        .id();
    let slot = builder
        .on(agent_ui::NAME)
        .expect_agent("send_message_to_user", json!({ "content": "hi" }))
        .unwrap()
        .depends_on(Some(&ask), Duration::from_secs(1))
        .unwrap()
        .id();
    let follow_up = builder
        .on(agent_ui::NAME)
        .call("list_messages", json!({}))
        .unwrap()
        .depends_on(Some(&slot), Duration::from_secs(1))
        .unwrap()
        .id();
    let graph = builder.finalize().unwrap();

    let (agent, mut turns) = ChannelAgent::new(1);
    let cancel = CancellationToken::new();
    let driver = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let turn = turns.recv().await.expect("agent turn");
            cancel.cancel();
            turn.respond(Ok(AgentDecision::NoAction));
        })
    };

    let report = env
        .run(&graph, Arc::new(agent), SchedulerConfig::default(), cancel)
        .await
        .unwrap();
    driver.await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.all_terminal());
    assert_eq!(report.event(&ask).unwrap().status, EventStatus::Completed);
    let follow_up = report.event(&follow_up).unwrap();
    assert_eq!(follow_up.status, EventStatus::Skipped);
    assert_eq!(follow_up.error_kind(), Some(ErrorKind::Cancelled));
    assert!(!env.is_running());
}
