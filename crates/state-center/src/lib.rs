use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::to_writer_pretty;
use agentsim_core_types::{AppName, EventId, RunId, SimError, ToolCall};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Terminal outcome of one scheduled event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchStatus {
    Success,
    Failure,
    Skipped,
}

impl DispatchStatus {
    fn as_str(self) -> &'static str {
        match self {
            DispatchStatus::Success => "success",
            DispatchStatus::Failure => "failure",
            DispatchStatus::Skipped => "skipped",
        }
    }
}

/// Timing collected around one dispatch attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchTiming {
    /// Wall time spent between readiness and start (lock and slot waits).
    pub wait_ms: u64,
    /// Wall time spent inside the capability or agent call.
    pub run_ms: u64,
    /// Run clock offset at the terminal transition.
    pub clock_ms: u64,
    pub in_flight: usize,
    pub slots_available: usize,
}

/// Summary collected for an event reaching a terminal state.
#[derive(Clone, Debug)]
pub struct DispatchEvent {
    pub run: RunId,
    pub event: EventId,
    pub kind: String,
    pub status: DispatchStatus,
    pub app: Option<AppName>,
    pub tool: String,
    pub timing: DispatchTiming,
    pub error: Option<SimError>,
    pub output: Option<serde_json::Value>,
    pub recorded_at: SystemTime,
}

impl DispatchEvent {
    pub fn success(
        run: RunId,
        event: EventId,
        kind: impl Into<String>,
        app: Option<AppName>,
        tool: String,
        timing: DispatchTiming,
        output: Option<serde_json::Value>,
    ) -> Self {
        Self {
            run,
            event,
            kind: kind.into(),
            status: DispatchStatus::Success,
            app,
            tool,
            timing,
            error: None,
            output,
            recorded_at: SystemTime::now(),
        }
    }

    pub fn failure(
        run: RunId,
        event: EventId,
        kind: impl Into<String>,
        app: Option<AppName>,
        tool: String,
        timing: DispatchTiming,
        error: SimError,
    ) -> Self {
        Self {
            run,
            event,
            kind: kind.into(),
            status: DispatchStatus::Failure,
            app,
            tool,
            timing,
            error: Some(error),
            output: None,
            recorded_at: SystemTime::now(),
        }
    }

    pub fn skipped(
        run: RunId,
        event: EventId,
        kind: impl Into<String>,
        app: Option<AppName>,
        tool: String,
        timing: DispatchTiming,
        reason: SimError,
    ) -> Self {
        Self {
            status: DispatchStatus::Skipped,
            ..Self::failure(run, event, kind, app, tool, timing, reason)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LifecycleAction {
    RunStarted,
    RunFinished,
    RunCancelled,
    DeadlineExceeded,
    AppReset,
    AppRestored,
    ResourceStarted,
    ResourceStopped,
    EnvironmentShutdown,
}

#[derive(Clone, Debug)]
pub struct LifecycleEvent {
    pub run: Option<RunId>,
    pub action: LifecycleAction,
    pub app: Option<AppName>,
    pub note: Option<String>,
    pub recorded_at: SystemTime,
}

impl LifecycleEvent {
    pub fn new(
        run: Option<RunId>,
        action: LifecycleAction,
        app: Option<AppName>,
        note: Option<String>,
    ) -> Self {
        Self {
            run,
            action,
            app,
            note,
            recorded_at: SystemTime::now(),
        }
    }
}

/// Expected-outcome record appended when an oracle event resolves.
#[derive(Clone, Debug)]
pub struct OracleEvent {
    pub run: RunId,
    pub event: EventId,
    pub expected: ToolCall,
    pub satisfied_by: Option<EventId>,
    pub executed: bool,
    pub recorded_at: SystemTime,
}

impl OracleEvent {
    pub fn new(
        run: RunId,
        event: EventId,
        expected: ToolCall,
        satisfied_by: Option<EventId>,
        executed: bool,
    ) -> Self {
        Self {
            run,
            event,
            expected,
            satisfied_by,
            executed,
            recorded_at: SystemTime::now(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum StateEvent {
    Dispatch(DispatchEvent),
    Lifecycle(LifecycleEvent),
    Oracle(OracleEvent),
}

impl StateEvent {
    pub fn dispatch(event: DispatchEvent) -> Self {
        Self::Dispatch(event)
    }

    pub fn lifecycle(event: LifecycleEvent) -> Self {
        Self::Lifecycle(event)
    }

    pub fn oracle(event: OracleEvent) -> Self {
        Self::Oracle(event)
    }

    fn run(&self) -> Option<&RunId> {
        match self {
            StateEvent::Dispatch(event) => Some(&event.run),
            StateEvent::Lifecycle(event) => event.run.as_ref(),
            StateEvent::Oracle(event) => Some(&event.run),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StateCenterStats {
    pub total_events: u64,
    pub dispatch_success: u64,
    pub dispatch_failure: u64,
    pub dispatch_skipped: u64,
    pub lifecycle_events: u64,
    pub oracle_expectations: u64,
    pub oracle_satisfied: u64,
}

#[derive(Debug)]
struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }
}

impl<T: Clone> BoundedRing<T> {
    fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[async_trait]
pub trait StateCenter: Send + Sync {
    async fn append(&self, event: StateEvent) -> Result<(), SimError>;
}

/// In-memory ring buffer storing recent run events, globally and scoped per run,
/// app and event.
pub struct InMemoryStateCenter {
    run_capacity: usize,
    app_capacity: usize,
    event_capacity: usize,
    events: Mutex<BoundedRing<StateEvent>>,
    run_events: DashMap<RunId, Mutex<BoundedRing<StateEvent>>>,
    app_events: DashMap<AppName, Mutex<BoundedRing<StateEvent>>>,
    event_events: DashMap<EventId, Mutex<BoundedRing<StateEvent>>>,
    stats: Mutex<StateCenterStats>,
}

impl InMemoryStateCenter {
    pub fn new(capacity: usize) -> Self {
        let global_capacity = capacity.max(1);
        Self {
            run_capacity: global_capacity,
            app_capacity: std::cmp::max(global_capacity / 2, 32),
            event_capacity: 8,
            events: Mutex::new(BoundedRing::new(global_capacity)),
            run_events: DashMap::new(),
            app_events: DashMap::new(),
            event_events: DashMap::new(),
            stats: Mutex::new(StateCenterStats::default()),
        }
    }

    pub fn snapshot(&self) -> Vec<StateEvent> {
        self.events.lock().snapshot()
    }

    pub fn stats(&self) -> StateCenterStats {
        self.stats.lock().clone()
    }

    pub fn recent_run(&self, run: &RunId) -> Vec<StateEvent> {
        self.run_events
            .get(run)
            .map(|entry| entry.value().lock().snapshot())
            .unwrap_or_default()
    }

    pub fn recent_app(&self, app: &AppName) -> Vec<StateEvent> {
        self.app_events
            .get(app)
            .map(|entry| entry.value().lock().snapshot())
            .unwrap_or_default()
    }

    pub fn recent_event(&self, event: &EventId) -> Vec<StateEvent> {
        self.event_events
            .get(event)
            .map(|entry| entry.value().lock().snapshot())
            .unwrap_or_default()
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let events = self.snapshot();
        let stats = self.stats();
        let serialized_events: Vec<SerializableStateEvent> =
            events.iter().map(SerializableStateEvent::from).collect();
        let snapshot = StateCenterSnapshot {
            stats,
            events: serialized_events,
            scopes: self.scope_counters(),
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StateCenter for InMemoryStateCenter {
    async fn append(&self, event: StateEvent) -> Result<(), SimError> {
        {
            let mut guard = self.events.lock();
            guard.push(event.clone());
        }
        self.push_scoped(&event);
        self.update_stats(&event);
        Ok(())
    }
}

#[derive(Serialize)]
struct StateCenterSnapshot {
    stats: StateCenterStats,
    events: Vec<SerializableStateEvent>,
    scopes: ScopeCounters,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum SerializableStateEvent {
    Dispatch(SerializableDispatchEvent),
    Lifecycle(SerializableLifecycleEvent),
    Oracle(SerializableOracleEvent),
}

#[derive(Serialize)]
struct SerializableDispatchEvent {
    status: &'static str,
    run: String,
    event: String,
    kind: String,
    app: Option<String>,
    tool: String,
    wait_ms: u64,
    run_ms: u64,
    clock_ms: u64,
    in_flight: usize,
    slots_available: usize,
    error_kind: Option<&'static str>,
    error: Option<String>,
    output: Option<serde_json::Value>,
    recorded_at_ms: u128,
}

#[derive(Serialize)]
struct SerializableLifecycleEvent {
    action: String,
    run: Option<String>,
    app: Option<String>,
    note: Option<String>,
    recorded_at_ms: u128,
}

#[derive(Serialize)]
struct SerializableOracleEvent {
    run: String,
    event: String,
    expected: ToolCall,
    satisfied_by: Option<String>,
    executed: bool,
    recorded_at_ms: u128,
}

#[derive(Serialize, Default)]
struct ScopeCounters {
    runs: Vec<ScopeCount>,
    apps: Vec<ScopeCount>,
    events: Vec<ScopeCount>,
}

#[derive(Serialize)]
struct ScopeCount {
    id: String,
    count: usize,
}

impl InMemoryStateCenter {
    fn push_scoped(&self, event: &StateEvent) {
        if let Some(run) = event.run() {
            self.push_run_event(run, event);
        }
        match event {
            StateEvent::Dispatch(dispatch) => {
                if let Some(app) = dispatch.app.as_ref() {
                    self.push_app_event(app, event);
                }
                self.push_event_event(&dispatch.event, event);
            }
            StateEvent::Lifecycle(lifecycle) => {
                if let Some(app) = lifecycle.app.as_ref() {
                    self.push_app_event(app, event);
                }
            }
            StateEvent::Oracle(oracle) => {
                self.push_app_event(&oracle.expected.app, event);
                self.push_event_event(&oracle.event, event);
            }
        }
    }

    fn push_run_event(&self, run: &RunId, event: &StateEvent) {
        let mut entry = self
            .run_events
            .entry(run.clone())
            .or_insert_with(|| Mutex::new(BoundedRing::new(self.run_capacity)));
        entry.value_mut().lock().push(event.clone());
    }

    fn push_app_event(&self, app: &AppName, event: &StateEvent) {
        let mut entry = self
            .app_events
            .entry(app.clone())
            .or_insert_with(|| Mutex::new(BoundedRing::new(self.app_capacity)));
        entry.value_mut().lock().push(event.clone());
    }

    fn push_event_event(&self, id: &EventId, event: &StateEvent) {
        let mut entry = self
            .event_events
            .entry(id.clone())
            .or_insert_with(|| Mutex::new(BoundedRing::new(self.event_capacity)));
        entry.value_mut().lock().push(event.clone());
    }

    fn scope_counters(&self) -> ScopeCounters {
        let mut counters = ScopeCounters {
            runs: self
                .run_events
                .iter()
                .map(|entry| ScopeCount {
                    id: entry.key().to_string(),
                    count: entry.value().lock().len(),
                })
                .collect(),
            apps: self
                .app_events
                .iter()
                .map(|entry| ScopeCount {
                    id: entry.key().to_string(),
                    count: entry.value().lock().len(),
                })
                .collect(),
            events: self
                .event_events
                .iter()
                .map(|entry| ScopeCount {
                    id: entry.key().to_string(),
                    count: entry.value().lock().len(),
                })
                .collect(),
        };
        // dashmap iteration order is arbitrary; keep snapshots diffable
        counters.runs.sort_by(|a, b| a.id.cmp(&b.id));
        counters.apps.sort_by(|a, b| a.id.cmp(&b.id));
        counters.events.sort_by(|a, b| a.id.cmp(&b.id));
        counters
    }

    fn update_stats(&self, event: &StateEvent) {
        let mut stats = self.stats.lock();
        stats.total_events = stats.total_events.saturating_add(1);
        match event {
            StateEvent::Dispatch(dispatch) => match dispatch.status {
                DispatchStatus::Success => {
                    stats.dispatch_success = stats.dispatch_success.saturating_add(1)
                }
                DispatchStatus::Failure => {
                    stats.dispatch_failure = stats.dispatch_failure.saturating_add(1)
                }
                DispatchStatus::Skipped => {
                    stats.dispatch_skipped = stats.dispatch_skipped.saturating_add(1)
                }
            },
            StateEvent::Lifecycle(_) => {
                stats.lifecycle_events = stats.lifecycle_events.saturating_add(1)
            }
            StateEvent::Oracle(oracle) => {
                stats.oracle_expectations = stats.oracle_expectations.saturating_add(1);
                if oracle.satisfied_by.is_some() {
                    stats.oracle_satisfied = stats.oracle_satisfied.saturating_add(1);
                }
            }
        }
    }
}

impl From<&StateEvent> for SerializableStateEvent {
    fn from(value: &StateEvent) -> Self {
        match value {
            StateEvent::Dispatch(event) => SerializableStateEvent::Dispatch(event.into()),
            StateEvent::Lifecycle(event) => SerializableStateEvent::Lifecycle(event.into()),
            StateEvent::Oracle(event) => SerializableStateEvent::Oracle(event.into()),
        }
    }
}

impl From<&DispatchEvent> for SerializableDispatchEvent {
    fn from(event: &DispatchEvent) -> Self {
        Self {
            status: event.status.as_str(),
            run: event.run.to_string(),
            event: event.event.to_string(),
            kind: event.kind.clone(),
            app: event.app.as_ref().map(|app| app.to_string()),
            tool: event.tool.clone(),
            wait_ms: event.timing.wait_ms,
            run_ms: event.timing.run_ms,
            clock_ms: event.timing.clock_ms,
            in_flight: event.timing.in_flight,
            slots_available: event.timing.slots_available,
            error_kind: event.error.as_ref().map(|err| err.kind().as_str()),
            error: event.error.as_ref().map(|err| err.message().to_string()),
            output: event.output.clone(),
            recorded_at_ms: timestamp_ms(event.recorded_at),
        }
    }
}

impl From<&LifecycleEvent> for SerializableLifecycleEvent {
    fn from(event: &LifecycleEvent) -> Self {
        Self {
            action: format!("{:?}", event.action),
            run: event.run.as_ref().map(|run| run.to_string()),
            app: event.app.as_ref().map(|app| app.to_string()),
            note: event.note.clone(),
            recorded_at_ms: timestamp_ms(event.recorded_at),
        }
    }
}

impl From<&OracleEvent> for SerializableOracleEvent {
    fn from(event: &OracleEvent) -> Self {
        Self {
            run: event.run.to_string(),
            event: event.event.to_string(),
            expected: event.expected.clone(),
            satisfied_by: event.satisfied_by.as_ref().map(|id| id.to_string()),
            executed: event.executed,
            recorded_at_ms: timestamp_ms(event.recorded_at),
        }
    }
}

fn timestamp_ms(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tempfile::NamedTempFile;

    fn timing(clock_ms: u64) -> DispatchTiming {
        DispatchTiming {
            clock_ms,
            slots_available: 4,
            ..DispatchTiming::default()
        }
    }

    #[tokio::test]
    async fn in_memory_center_bounded() {
        let center = InMemoryStateCenter::new(2);
        let run = RunId::new();
        let mail = AppName::new("Mail");

        center
            .append(StateEvent::dispatch(DispatchEvent::success(
                run.clone(),
                EventId::sequential(1),
                "UserAction",
                Some(mail.clone()),
                "Mail.list_inbox".into(),
                timing(1000),
                Some(json!([])),
            )))
            .await
            .unwrap();

        center
            .append(StateEvent::dispatch(DispatchEvent::failure(
                run.clone(),
                EventId::sequential(2),
                "UserAction",
                Some(mail.clone()),
                "Mail.send_email".into(),
                timing(2000),
                SimError::capability("smtp down"),
            )))
            .await
            .unwrap();

        center
            .append(StateEvent::dispatch(DispatchEvent::skipped(
                run.clone(),
                EventId::sequential(3),
                "UserAction",
                Some(mail.clone()),
                "Mail.archive_email".into(),
                timing(2000),
                SimError::new(agentsim_core_types::ErrorKind::UpstreamFailed, "evt-0002"),
            )))
            .await
            .unwrap();

        center
            .append(StateEvent::lifecycle(LifecycleEvent::new(
                Some(run.clone()),
                LifecycleAction::RunFinished,
                None,
                Some("test".into()),
            )))
            .await
            .unwrap();

        let events = center.snapshot();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StateEvent::Dispatch(_)));
        assert!(matches!(events[1], StateEvent::Lifecycle(_)));
        let stats = center.stats();
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.lifecycle_events, 1);
        assert_eq!(stats.dispatch_success, 1);
        assert_eq!(stats.dispatch_failure, 1);
        assert_eq!(stats.dispatch_skipped, 1);

        assert_eq!(center.recent_run(&run).len(), 2);
        assert_eq!(center.recent_app(&mail).len(), 3);
        assert_eq!(center.recent_event(&EventId::sequential(2)).len(), 1);

        let file = NamedTempFile::new().expect("tempfile");
        center
            .write_snapshot(file.path())
            .expect("write snapshot to disk");
        let written = std::fs::read_to_string(file.path()).expect("read snapshot");
        assert!(written.contains("\"total_events\""));
        assert!(written.contains("\"scopes\""));
        assert!(written.contains("UpstreamFailed"));
    }

    #[tokio::test]
    async fn oracle_expectations_counted() {
        let center = InMemoryStateCenter::new(8);
        let run = RunId::new();
        let expected = ToolCall::new("Mail", "list_inbox", json!({}));

        center
            .append(StateEvent::oracle(OracleEvent::new(
                run.clone(),
                EventId::sequential(4),
                expected.clone(),
                Some(EventId::sequential(3)),
                false,
            )))
            .await
            .unwrap();
        center
            .append(StateEvent::oracle(OracleEvent::new(
                run.clone(),
                EventId::sequential(5),
                expected,
                None,
                true,
            )))
            .await
            .unwrap();

        let stats = center.stats();
        assert_eq!(stats.oracle_expectations, 2);
        assert_eq!(stats.oracle_satisfied, 1);
        assert_eq!(center.recent_app(&AppName::new("Mail")).len(), 2);
    }
}
