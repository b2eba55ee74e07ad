use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentsim_core_types::{AppName, ErrorKind, EventId, RunId, SimError, ToolCall};
use agentsim_event_graph::{EventGraph, EventKind, EventResult, EventStatus, EventTarget};
use agentsim_state_center::{
    DispatchEvent, DispatchTiming, LifecycleAction, LifecycleEvent, OracleEvent, StateCenter,
    StateEvent,
};

use crate::agent::{Agent, AgentDecision, AgentRequest, ToolSchema};
use crate::clock::{millis, RunClock};
use crate::error::SchedulerError;
use crate::executor::{AccessManager, AppExecutor, AppTable};
use crate::metrics::SchedulerMetrics;
use crate::model::SchedulerConfig;
use crate::report::{AgentResult, EventRecord, OracleExpectation, RunReport, RunStatus};
use crate::runtime::{RunTable, TimerKind};

/// Drives event graphs to completion against a set of apps.
pub struct Scheduler {
    config: SchedulerConfig,
    state_center: Arc<dyn StateCenter>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, state_center: Arc<dyn StateCenter>) -> Self {
        Self {
            config,
            state_center,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Configuration checks that are fatal to a run.
    pub fn validate(&self, graph: &EventGraph, apps: &AppTable) -> Result<(), SchedulerError> {
        if self.config.max_concurrency == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.config.tick.is_zero() {
            return Err(SchedulerError::InvalidConfig("tick must be positive".into()));
        }
        for event in graph.events() {
            let Some(app_name) = event.target.app() else {
                continue;
            };
            let app = apps.get(app_name).ok_or_else(|| SchedulerError::UnknownApp {
                event: event.id.clone(),
                app: app_name.clone(),
            })?;
            if let EventTarget::Call(call) = &event.target {
                app.capabilities()
                    .validate_call(&call.capability, &call.args)
                    .map_err(|err| {
                        SchedulerError::InvalidConfig(format!("{}: {err}", event.id))
                    })?;
            }
        }
        Ok(())
    }

    /// Runs `graph` until every event is terminal, the duration budget is spent,
    /// or `cancel` fires. In-flight events are always allowed to finish.
    pub async fn run(
        &self,
        graph: &EventGraph,
        apps: &AppTable,
        agent: Arc<dyn Agent>,
        cancel: CancellationToken,
    ) -> Result<RunReport, SchedulerError> {
        self.validate(graph, apps)?;

        let mut run = RunContext::new(&self.config, &self.state_center, graph, apps, agent);
        info!(
            target: "scheduler",
            run = %run.run_id,
            events = graph.len(),
            clock = ?self.config.clock,
            "run started"
        );
        run.lifecycle(
            LifecycleAction::RunStarted,
            Some(format!("{} events", graph.len())),
        )
        .await;

        let status = run.drive(&cancel).await;
        run.fail_stranded().await;

        let action = match status {
            RunStatus::Completed => LifecycleAction::RunFinished,
            RunStatus::DeadlineExceeded => LifecycleAction::DeadlineExceeded,
            RunStatus::Cancelled => LifecycleAction::RunCancelled,
        };
        run.lifecycle(action, None).await;
        let report = run.into_report(status);
        info!(
            target: "scheduler",
            run = %report.run_id,
            status = ?report.status,
            elapsed_ms = report.elapsed_ms,
            completed = report.count(EventStatus::Completed),
            failed = report.count(EventStatus::Failed),
            skipped = report.count(EventStatus::Skipped),
            "run finished"
        );
        Ok(report)
    }
}

struct TaskOutcome {
    idx: usize,
    result: EventResult,
    executed: Option<ToolCall>,
    decision: Option<ToolCall>,
    wait: Duration,
    run: Duration,
    /// Run-clock span implied by a timeout bound, applied on the virtual clock.
    span_floor: Option<Duration>,
    agent_timed_out: bool,
    /// Think time of an agent that answered; the event starts once it decides.
    decided_after: Option<Duration>,
}

impl TaskOutcome {
    fn new(idx: usize, result: EventResult) -> Self {
        Self {
            idx,
            result,
            executed: None,
            decision: None,
            wait: Duration::ZERO,
            run: Duration::ZERO,
            span_floor: None,
            agent_timed_out: false,
            decided_after: None,
        }
    }

    fn failed(idx: usize, error: SimError) -> Self {
        Self::new(idx, EventResult::Failure { error })
    }
}

fn into_result(output: Result<Value, SimError>) -> EventResult {
    match output {
        Ok(output) => EventResult::Success { output },
        Err(error) => EventResult::Failure { error },
    }
}

struct RunContext<'a> {
    run_id: RunId,
    config: &'a SchedulerConfig,
    state_center: &'a Arc<dyn StateCenter>,
    graph: &'a EventGraph,
    table: RunTable,
    clock: RunClock,
    executor: AppExecutor,
    agent: Arc<dyn Agent>,
    metrics: SchedulerMetrics,
    tasks: JoinSet<TaskOutcome>,
    /// Completed agent actions and the calls they made, in completion order.
    agent_calls: Vec<(EventId, ToolCall)>,
    decisions: HashMap<usize, ToolCall>,
    /// Virtual-clock outcomes held until the clock reaches their finish time,
    /// keyed by (finish time, arrival order).
    deferred: BTreeMap<(Duration, u64), TaskOutcome>,
    deferred_seq: u64,
}

impl<'a> RunContext<'a> {
    fn new(
        config: &'a SchedulerConfig,
        state_center: &'a Arc<dyn StateCenter>,
        graph: &'a EventGraph,
        apps: &AppTable,
        agent: Arc<dyn Agent>,
    ) -> Self {
        let access = Arc::new(AccessManager::new(config.max_concurrency));
        let executor = AppExecutor::new(Arc::new(apps.clone()), access, config.call_timeout);
        Self {
            run_id: RunId::new(),
            config,
            state_center,
            graph,
            table: RunTable::new(graph),
            clock: RunClock::start(config.clock),
            executor,
            agent,
            metrics: SchedulerMetrics::default(),
            tasks: JoinSet::new(),
            agent_calls: Vec::new(),
            decisions: HashMap::new(),
            deferred: BTreeMap::new(),
            deferred_seq: 0,
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> RunStatus {
        let budget = self.config.duration;
        let mut status = RunStatus::Completed;
        let mut draining = false;

        loop {
            if !draining && cancel.is_cancelled() {
                warn!(target: "scheduler", run = %self.run_id, in_flight = self.tasks.len(), "run cancelled; draining");
                self.skip_waiting(ErrorKind::Cancelled, "run cancelled").await;
                status = RunStatus::Cancelled;
                draining = true;
            }
            if !draining {
                self.dispatch_due(budget).await;
                if self.over_budget(budget) {
                    self.deadline_exceeded().await;
                    status = RunStatus::DeadlineExceeded;
                    draining = true;
                }
            }

            if self.tasks.is_empty() {
                if draining {
                    self.flush_deferred(None).await;
                    // successors released by drained tasks never dispatch
                    match status {
                        RunStatus::Cancelled => {
                            self.skip_waiting(ErrorKind::Cancelled, "run cancelled").await
                        }
                        RunStatus::DeadlineExceeded => {
                            self.skip_waiting(
                                ErrorKind::DeadlineExceeded,
                                "scenario duration exceeded",
                            )
                            .await
                        }
                        RunStatus::Completed => {}
                    }
                    break;
                }
                if self.table.is_done() {
                    break;
                }
                let next_timer = self.table.next_deadline();
                let next_finish = self.deferred.keys().next().map(|(at, _)| *at);
                let Some(at) = next_timer.into_iter().chain(next_finish).min() else {
                    self.skip_waiting(ErrorKind::Internal, "no event can become ready")
                        .await;
                    break;
                };
                if let Some(limit) = budget {
                    if at > limit && self.clock.is_virtual() {
                        self.clock.advance_to(limit);
                        self.deadline_exceeded().await;
                        status = RunStatus::DeadlineExceeded;
                        draining = true;
                        continue;
                    }
                }
                if next_finish == Some(at) {
                    // finishes at an instant land before timers due at it
                    self.clock.advance_to(at);
                    self.flush_deferred(Some(at)).await;
                    continue;
                }
                let target = budget.map_or(at, |limit| at.min(limit));
                self.idle_until(target, cancel).await;
                continue;
            }

            self.await_progress(cancel, draining, budget).await;
        }
        status
    }

    fn over_budget(&self, budget: Option<Duration>) -> bool {
        let Some(limit) = budget else {
            return false;
        };
        if self.table.is_done() {
            return false;
        }
        let now = self.clock.now();
        if self.clock.is_virtual() {
            now > limit
        } else {
            now >= limit
        }
    }

    async fn deadline_exceeded(&mut self) {
        warn!(
            target: "scheduler",
            run = %self.run_id,
            clock_ms = millis(self.clock.now()),
            in_flight = self.tasks.len(),
            "scenario duration exceeded"
        );
        self.skip_waiting(ErrorKind::DeadlineExceeded, "scenario duration exceeded")
            .await;
    }

    async fn idle_until(&mut self, at: Duration, cancel: &CancellationToken) {
        match self.clock.instant_at(at) {
            None => self.clock.advance_to(at),
            Some(deadline) => {
                let wake = deadline.min(Instant::now() + self.config.tick);
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
    }

    /// Waits for one task to finish, cancellation, or (real clock only) the next
    /// timer or budget instant.
    async fn await_progress(
        &mut self,
        cancel: &CancellationToken,
        draining: bool,
        budget: Option<Duration>,
    ) {
        let wake = if draining {
            None
        } else {
            let next = self.table.next_deadline();
            let target = match (next, budget) {
                (Some(at), Some(limit)) => Some(at.min(limit)),
                (at, limit) => at.or(limit),
            };
            target
                .and_then(|at| self.clock.instant_at(at))
                .map(|deadline| deadline.min(Instant::now() + self.config.tick))
        };

        tokio::select! {
            joined = self.tasks.join_next() => {
                match joined {
                    Some(Ok(outcome)) => self.on_outcome(outcome).await,
                    Some(Err(err)) => warn!(target: "scheduler", run = %self.run_id, "event task lost: {err}"),
                    None => {}
                }
            }
            _ = cancel.cancelled(), if !draining => {}
            _ = sleep_until_opt(wake) => {}
        }
    }

    async fn dispatch_due(&mut self, budget: Option<Duration>) {
        let now = self.clock.now();
        let horizon = budget.map_or(now, |limit| now.min(limit));
        let due = self.table.pop_due(horizon);
        if due.is_empty() {
            return;
        }

        let virtual_clock = self.clock.is_virtual();
        let mut eligible = Vec::with_capacity(due.len());
        for (idx, kind, due_at) in due {
            let at = if virtual_clock { due_at } else { now };
            match kind {
                TimerKind::Eligible => {
                    self.table.mark_ready(idx, at);
                    eligible.push((idx, at));
                }
                TimerKind::DependencyTimeout => {
                    let timeout = self.config.dependency_timeout.unwrap_or_default();
                    let error = SimError::timeout(format!(
                        "dependencies of {} unresolved after {timeout:?}",
                        self.graph.event_at(idx).id
                    ));
                    self.complete(idx, at, EventResult::Failure { error }, DispatchTiming::default())
                        .await;
                }
            }
        }

        for (idx, at) in eligible {
            // an earlier dispatch in this batch may have settled it
            if self.table.status(idx) != EventStatus::Ready {
                continue;
            }
            self.start(idx, at).await;
        }
    }

    async fn start(&mut self, idx: usize, now: Duration) {
        let graph = self.graph;
        let event = graph.event_at(idx);
        debug!(target: "scheduler", run = %self.run_id, event = %event.id, target = %event.describe(), "event ready");
        match (&event.kind, &event.target) {
            (EventKind::AgentAction, _) => self.spawn_agent(idx, now),
            (EventKind::OracleAction, EventTarget::Call(expected)) => {
                let satisfied_by = self
                    .agent_calls
                    .iter()
                    .find(|(_, call)| call.is_equivalent(expected))
                    .map(|(id, _)| id.clone());
                match satisfied_by {
                    Some(by) => self.satisfy_oracle(idx, now, by).await,
                    None => self.spawn_call(idx, now, expected.clone(), true),
                }
            }
            (_, EventTarget::Call(call)) => self.spawn_call(idx, now, call.clone(), false),
            (_, EventTarget::Agent(_)) => {
                let error = SimError::internal(format!("{} has an agent target", event.id));
                self.table.mark_running(idx, now);
                self.complete(idx, now, EventResult::Failure { error }, DispatchTiming::default())
                    .await;
            }
        }
    }

    async fn satisfy_oracle(&mut self, idx: usize, now: Duration, by: EventId) {
        self.table.mark_running(idx, now);
        self.table.record_satisfied_by(idx, by.clone());
        self.metrics.record_oracle_satisfied();
        let output = json!({ "satisfied_by": by });
        self.complete(idx, now, EventResult::Success { output }, DispatchTiming::default())
            .await;
    }

    fn spawn_call(&mut self, idx: usize, now: Duration, call: ToolCall, exclusive: bool) {
        self.table.mark_running(idx, now);
        self.metrics.record_dispatched();
        let executor = self.executor.clone();
        self.spawn_task(idx, async move {
            let done = if exclusive {
                executor.execute_exclusive(&call).await
            } else {
                executor.execute(&call).await
            };
            TaskOutcome {
                idx,
                result: into_result(done.output),
                executed: Some(call),
                decision: None,
                wait: done.wait,
                run: done.run,
                span_floor: done.timed_out.then(|| executor.call_timeout()),
                agent_timed_out: false,
                decided_after: None,
            }
        });
    }

    fn spawn_agent(&mut self, idx: usize, now: Duration) {
        let request = self.agent_request(idx, now);
        let slot_app = request.app.clone();
        self.table.mark_dispatched(idx);
        self.metrics.record_dispatched();
        self.metrics.record_agent_request();

        let agent = Arc::clone(&self.agent);
        let executor = self.executor.clone();
        let agent_timeout = self.config.agent_timeout;
        self.spawn_task(idx, async move {
            let asked = Instant::now();
            let decision = match tokio::time::timeout(agent_timeout, agent.decide(request)).await {
                Ok(Ok(decision)) => decision,
                Ok(Err(error)) => return TaskOutcome::failed(idx, error),
                Err(_) => {
                    let error = SimError::timeout(format!(
                        "agent did not respond within {agent_timeout:?}"
                    ));
                    return TaskOutcome {
                        run: asked.elapsed(),
                        span_floor: Some(agent_timeout),
                        agent_timed_out: true,
                        ..TaskOutcome::failed(idx, error)
                    };
                }
            };
            let think = asked.elapsed();

            let call = match decision {
                AgentDecision::NoAction => {
                    let done = EventResult::Success {
                        output: Value::Null,
                    };
                    return TaskOutcome {
                        run: think,
                        decided_after: Some(think),
                        ..TaskOutcome::new(idx, done)
                    };
                }
                AgentDecision::Act(call) => call,
            };

            let rejected = match &slot_app {
                Some(app) if app != &call.app => Some(SimError::invalid_argument(format!(
                    "agent slot on {app} cannot act on {}",
                    call.app
                ))),
                _ => executor.validate(&call).err(),
            };
            if let Some(error) = rejected {
                return TaskOutcome {
                    decision: Some(call),
                    run: think,
                    decided_after: Some(think),
                    ..TaskOutcome::failed(idx, error)
                };
            }

            let done = executor.execute(&call).await;
            TaskOutcome {
                idx,
                result: into_result(done.output),
                executed: Some(call.clone()),
                decision: Some(call),
                wait: think + done.wait,
                run: done.run,
                span_floor: done.timed_out.then(|| executor.call_timeout()),
                agent_timed_out: false,
                decided_after: Some(think),
            }
        });
    }

    fn spawn_task<F>(&mut self, idx: usize, task: F)
    where
        F: Future<Output = TaskOutcome> + Send + 'static,
    {
        self.tasks.spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => TaskOutcome::failed(idx, SimError::internal("event task panicked")),
            }
        });
    }

    fn agent_request(&self, idx: usize, now: Duration) -> AgentRequest {
        let event = self.graph.event_at(idx);
        let (app, hint) = match &event.target {
            EventTarget::Agent(slot) => (slot.app.clone(), slot.hint.clone()),
            EventTarget::Call(call) => (Some(call.app.clone()), Some(call.clone())),
        };
        let tools = self
            .executor
            .apps()
            .iter()
            .filter(|(name, _)| app.as_ref().map_or(true, |slot_app| slot_app == *name))
            .flat_map(|(name, app)| {
                app.capabilities().iter().map(move |spec| ToolSchema {
                    app: name.clone(),
                    schema: spec.to_json_schema(),
                })
            })
            .collect();
        let ready = self
            .graph
            .events()
            .iter()
            .enumerate()
            .filter(|(other, candidate)| {
                *other != idx
                    && candidate.kind == EventKind::AgentAction
                    && self.table.status(*other) == EventStatus::Ready
            })
            .map(|(_, candidate)| candidate.id.clone())
            .collect();
        AgentRequest {
            run: self.run_id.clone(),
            event: event.id.clone(),
            label: event.label.clone(),
            app,
            hint,
            tools,
            ready,
            clock_ms: millis(now),
            timeout: self.config.agent_timeout,
        }
    }

    /// Run-clock instant a returned task finishes at, when a timeout bound
    /// puts it past the current virtual time.
    fn deferred_until(&self, outcome: &TaskOutcome) -> Option<Duration> {
        let floor = outcome.span_floor?;
        if !self.clock.is_virtual() {
            return None;
        }
        let slot = self.table.slot(outcome.idx);
        let origin = slot.started_at.or(slot.ready_at).unwrap_or_default();
        let finish = origin + floor;
        (finish > self.clock.now()).then_some(finish)
    }

    async fn on_outcome(&mut self, outcome: TaskOutcome) {
        if let Some(finish) = self.deferred_until(&outcome) {
            debug!(target: "scheduler", run = %self.run_id, event = %self.graph.event_at(outcome.idx).id, finish_ms = millis(finish), "outcome deferred");
            self.deferred_seq += 1;
            self.deferred.insert((finish, self.deferred_seq), outcome);
            return;
        }
        self.apply_outcome(outcome).await;
    }

    /// Applies held outcomes finishing at or before `until`, or all of them,
    /// each at its own finish time.
    async fn flush_deferred(&mut self, until: Option<Duration>) {
        while let Some(entry) = self.deferred.first_entry() {
            let (finish, _) = *entry.key();
            if until.is_some_and(|until| finish > until) {
                break;
            }
            let outcome = entry.remove();
            self.clock.advance_to(finish);
            self.apply_outcome(outcome).await;
        }
    }

    async fn apply_outcome(&mut self, outcome: TaskOutcome) {
        self.metrics.record_returned();
        let idx = outcome.idx;
        let slot = self.table.slot(idx);
        let origin = slot.started_at.or(slot.ready_at).unwrap_or_default();
        if let Some(think) = outcome.decided_after {
            let started = if self.clock.is_virtual() {
                origin
            } else {
                origin + think
            };
            self.table.mark_running(idx, started);
        }
        if let Some(floor) = outcome.span_floor {
            self.clock.advance_to(origin + floor);
        }
        if outcome.agent_timed_out {
            self.metrics.record_agent_timeout();
        }
        let now = self.clock.now();

        let graph = self.graph;
        let event = graph.event_at(idx);
        if let Some(call) = outcome.decision {
            self.decisions.insert(idx, call);
        }
        let succeeded = matches!(outcome.result, EventResult::Success { .. });
        if let Some(call) = outcome.executed {
            if succeeded && event.kind == EventKind::AgentAction {
                self.agent_calls.push((event.id.clone(), call.clone()));
            }
            self.table.record_execution(idx, call);
        }

        let timing = DispatchTiming {
            wait_ms: millis(outcome.wait),
            run_ms: millis(outcome.run),
            clock_ms: millis(now),
            in_flight: self.metrics.in_flight(),
            slots_available: self.executor.slots_available(),
        };
        self.complete(idx, now, outcome.result, timing).await;
    }

    /// Sets the terminal result, logs it and resolves successors.
    async fn complete(&mut self, idx: usize, at: Duration, result: EventResult, timing: DispatchTiming) {
        let status = self.table.finish(idx, at, result);
        let timing = DispatchTiming {
            clock_ms: millis(at),
            ..timing
        };
        match status {
            EventStatus::Completed => {
                self.metrics.record_completed();
                self.log_timeline(idx, timing).await;
            }
            _ => {
                self.metrics.record_failed();
                self.log_failure(idx, timing).await;
            }
        }
        if self.graph.event_at(idx).kind == EventKind::OracleAction {
            self.log_oracle(idx).await;
        }

        let skipped = self.table.resolve(
            self.graph,
            idx,
            at,
            self.config.failure_policy,
            self.config.dependency_timeout,
        );
        for succ in skipped {
            self.metrics.record_skipped();
            self.log_skipped(succ).await;
        }
    }

    async fn skip_waiting(&mut self, kind: ErrorKind, reason: &str) {
        let now = self.clock.now();
        for idx in self.table.waiting() {
            self.table.skip(idx, now, SimError::new(kind, reason));
            self.metrics.record_skipped();
            self.log_skipped(idx).await;
        }
    }

    /// Events whose task vanished without reporting are failed so the report
    /// only ever holds terminal states.
    async fn fail_stranded(&mut self) {
        let now = self.clock.now();
        for idx in self.table.in_flight() {
            let error = SimError::internal("event task ended without a result");
            self.complete(idx, now, EventResult::Failure { error }, DispatchTiming::default())
                .await;
        }
        self.skip_waiting(ErrorKind::Internal, "run ended before event became ready")
            .await;
    }

    async fn log_timeline(&self, idx: usize, timing: DispatchTiming) {
        let event = self.graph.event_at(idx);
        let slot = self.table.slot(idx);
        info!(
            target: "scheduler",
            run = %self.run_id,
            event = %event.id,
            tool = %event.describe(),
            wait_ms = timing.wait_ms,
            run_ms = timing.run_ms,
            clock_ms = timing.clock_ms,
            in_flight = timing.in_flight,
            slots_available = timing.slots_available,
            "event completed"
        );
        let output = slot.result.as_ref().and_then(EventResult::output).cloned();
        self.append(StateEvent::dispatch(DispatchEvent::success(
            self.run_id.clone(),
            event.id.clone(),
            format!("{:?}", event.kind),
            self.event_app(idx),
            self.tool_label(idx),
            timing,
            output,
        )))
        .await;
    }

    async fn log_failure(&self, idx: usize, timing: DispatchTiming) {
        let event = self.graph.event_at(idx);
        let error = self
            .table
            .slot(idx)
            .result
            .as_ref()
            .and_then(EventResult::error)
            .cloned()
            .unwrap_or_else(|| SimError::internal("missing error"));
        warn!(
            target: "scheduler",
            run = %self.run_id,
            event = %event.id,
            tool = %event.describe(),
            kind = %error.kind(),
            wait_ms = timing.wait_ms,
            run_ms = timing.run_ms,
            clock_ms = timing.clock_ms,
            "event failed: {}",
            error.message()
        );
        self.append(StateEvent::dispatch(DispatchEvent::failure(
            self.run_id.clone(),
            event.id.clone(),
            format!("{:?}", event.kind),
            self.event_app(idx),
            self.tool_label(idx),
            timing,
            error,
        )))
        .await;
    }

    async fn log_skipped(&self, idx: usize) {
        let event = self.graph.event_at(idx);
        let reason = self
            .table
            .slot(idx)
            .result
            .as_ref()
            .and_then(EventResult::error)
            .cloned()
            .unwrap_or_else(|| SimError::internal("missing skip reason"));
        info!(
            target: "scheduler",
            run = %self.run_id,
            event = %event.id,
            reason = %reason.kind(),
            "event skipped"
        );
        let timing = DispatchTiming {
            clock_ms: millis(self.clock.now()),
            in_flight: self.metrics.in_flight(),
            slots_available: self.executor.slots_available(),
            ..DispatchTiming::default()
        };
        self.append(StateEvent::dispatch(DispatchEvent::skipped(
            self.run_id.clone(),
            event.id.clone(),
            format!("{:?}", event.kind),
            self.event_app(idx),
            self.tool_label(idx),
            timing,
            reason,
        )))
        .await;
    }

    async fn log_oracle(&self, idx: usize) {
        let event = self.graph.event_at(idx);
        let Some(expected) = event.target.call() else {
            return;
        };
        let slot = self.table.slot(idx);
        self.append(StateEvent::oracle(OracleEvent::new(
            self.run_id.clone(),
            event.id.clone(),
            expected.clone(),
            slot.satisfied_by.clone(),
            slot.executed.is_some(),
        )))
        .await;
    }

    async fn lifecycle(&self, action: LifecycleAction, note: Option<String>) {
        self.append(StateEvent::lifecycle(LifecycleEvent::new(
            Some(self.run_id.clone()),
            action,
            None,
            note,
        )))
        .await;
    }

    async fn append(&self, event: StateEvent) {
        if let Err(err) = self.state_center.append(event).await {
            warn!("state center append failed: {err}");
        }
    }

    fn event_app(&self, idx: usize) -> Option<AppName> {
        let slot = self.table.slot(idx);
        slot.executed
            .as_ref()
            .map(|call| call.app.clone())
            .or_else(|| self.graph.event_at(idx).target.app().cloned())
    }

    fn tool_label(&self, idx: usize) -> String {
        match &self.table.slot(idx).executed {
            Some(call) => call.to_string(),
            None => self.graph.event_at(idx).describe(),
        }
    }

    fn into_report(self, status: RunStatus) -> RunReport {
        let RunContext {
            run_id,
            config,
            graph,
            table,
            clock,
            metrics,
            mut decisions,
            ..
        } = self;

        let mut events = Vec::with_capacity(graph.len());
        let mut oracle = Vec::new();
        let mut agent = Vec::new();
        for (idx, (event, slot)) in graph.events().iter().zip(table.slots()).enumerate() {
            match (&event.kind, &event.target) {
                (EventKind::OracleAction, EventTarget::Call(expected)) => {
                    oracle.push(OracleExpectation {
                        event: event.id.clone(),
                        expected: expected.clone(),
                        satisfied_by: slot.satisfied_by.clone(),
                        executed: slot.executed.is_some(),
                        status: slot.status,
                    })
                }
                (EventKind::AgentAction, EventTarget::Agent(agent_slot)) => {
                    agent.push(AgentResult {
                        event: event.id.clone(),
                        hint: agent_slot.hint.clone(),
                        decision: decisions.remove(&idx),
                        status: slot.status,
                        error: slot.result.as_ref().and_then(EventResult::error).cloned(),
                    })
                }
                _ => {}
            }
            events.push(EventRecord {
                id: event.id.clone(),
                kind: event.kind,
                target: event.describe(),
                app: event.target.app().cloned(),
                label: event.label.clone(),
                status: slot.status,
                ready_ms: slot.ready_at.map(millis),
                started_ms: slot.started_at.map(millis),
                finished_ms: slot.finished_at.map(millis),
                executed: slot.executed.clone(),
                result: slot.result.clone(),
            });
        }

        RunReport {
            run_id,
            status,
            clock: config.clock,
            elapsed_ms: millis(clock.now()),
            events,
            oracle,
            agent,
            metrics: metrics.snapshot(),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
