use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use agentsim_core_types::{ErrorKind, EventId, SimError, ToolCall};
use agentsim_event_graph::{EventGraph, EventResult, EventStatus, FailurePolicy};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum TimerKind {
    /// All dependencies resolved and the delay elapsed.
    Eligible,
    /// Dependencies still unresolved when the dependency timeout expired.
    DependencyTimeout,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct Timer {
    at: Duration,
    idx: usize,
    kind: TimerKind,
    seq: u64,
}

/// Mutable per-run state of one event. The graph itself is never touched.
#[derive(Clone, Debug)]
pub struct EventSlot {
    pub status: EventStatus,
    pub result: Option<EventResult>,
    pub ready_at: Option<Duration>,
    pub started_at: Option<Duration>,
    pub finished_at: Option<Duration>,
    /// Call that actually ran, for agent and capability events.
    pub executed: Option<ToolCall>,
    pub satisfied_by: Option<EventId>,
    /// Handed to a task that has not reported back yet.
    in_flight: bool,
    remaining: usize,
    latest_resolution: Duration,
    first_resolution: Option<Duration>,
}

impl EventSlot {
    fn new(remaining: usize) -> Self {
        Self {
            status: EventStatus::Pending,
            result: None,
            ready_at: None,
            started_at: None,
            finished_at: None,
            executed: None,
            satisfied_by: None,
            in_flight: false,
            remaining,
            latest_resolution: Duration::ZERO,
            first_resolution: None,
        }
    }
}

/// Status table plus the readiness frontier for one run.
///
/// Events enter the frontier as timers once their last dependency resolves;
/// timers whose event moved on are dropped lazily when popped. Timers due at
/// the same instant pop in graph insertion order.
#[derive(Debug)]
pub struct RunTable {
    slots: Vec<EventSlot>,
    timers: BinaryHeap<Reverse<Timer>>,
    seq: u64,
    terminal: usize,
}

impl RunTable {
    pub fn new(graph: &EventGraph) -> Self {
        let slots = (0..graph.len())
            .map(|idx| EventSlot::new(graph.predecessors_of(idx).len()))
            .collect();
        let mut table = Self {
            slots,
            timers: BinaryHeap::new(),
            seq: 0,
            terminal: 0,
        };
        let roots: Vec<usize> = graph.roots().collect();
        for idx in roots {
            let delay = graph.event_at(idx).delay;
            table.push_timer(delay, idx, TimerKind::Eligible);
        }
        table
    }

    pub fn slot(&self, idx: usize) -> &EventSlot {
        &self.slots[idx]
    }

    pub fn slots(&self) -> &[EventSlot] {
        &self.slots
    }

    pub fn status(&self, idx: usize) -> EventStatus {
        self.slots[idx].status
    }

    pub fn is_done(&self) -> bool {
        self.terminal == self.slots.len()
    }

    pub fn count(&self, status: EventStatus) -> usize {
        self.slots.iter().filter(|slot| slot.status == status).count()
    }

    /// Earliest live timer, discarding stale ones on the way.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse(timer)) = self.timers.peek().copied() {
            if self.is_live(&timer) {
                return Some(timer.at);
            }
            self.timers.pop();
        }
        None
    }

    /// Pops every live timer due at or before `now`, in deadline order, with
    /// the instant each one fell due.
    pub fn pop_due(&mut self, now: Duration) -> Vec<(usize, TimerKind, Duration)> {
        let mut due = Vec::new();
        while let Some(Reverse(timer)) = self.timers.peek().copied() {
            if timer.at > now {
                break;
            }
            self.timers.pop();
            if self.is_live(&timer) {
                due.push((timer.idx, timer.kind, timer.at));
            }
        }
        due
    }

    pub fn mark_ready(&mut self, idx: usize, at: Duration) {
        let slot = &mut self.slots[idx];
        debug_assert!(slot.status.can_transition_to(EventStatus::Ready));
        slot.status = EventStatus::Ready;
        slot.ready_at = Some(at);
    }

    pub fn mark_running(&mut self, idx: usize, at: Duration) {
        let slot = &mut self.slots[idx];
        debug_assert!(slot.status.can_transition_to(EventStatus::Running));
        slot.status = EventStatus::Running;
        slot.started_at = Some(at);
        slot.in_flight = true;
    }

    /// Hands a ready event to a task without starting it; it stays `Ready`
    /// until the task reports what it did.
    pub fn mark_dispatched(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        debug_assert_eq!(slot.status, EventStatus::Ready);
        slot.in_flight = true;
    }

    /// Non-terminal events owned by a task.
    pub fn in_flight(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_flight && !slot.status.is_terminal())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Records the single result of an executed event.
    pub fn finish(&mut self, idx: usize, at: Duration, result: EventResult) -> EventStatus {
        let status = match result {
            EventResult::Success { .. } => EventStatus::Completed,
            EventResult::Failure { .. } => EventStatus::Failed,
        };
        self.settle(idx, at, status, result);
        status
    }

    pub fn skip(&mut self, idx: usize, at: Duration, reason: SimError) {
        self.settle(
            idx,
            at,
            EventStatus::Skipped,
            EventResult::Failure { error: reason },
        );
    }

    pub fn record_execution(&mut self, idx: usize, call: ToolCall) {
        self.slots[idx].executed = Some(call);
    }

    pub fn record_satisfied_by(&mut self, idx: usize, by: EventId) {
        self.slots[idx].satisfied_by = Some(by);
    }

    /// Events that never started and no task owns.
    pub fn waiting(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                !slot.in_flight
                    && matches!(slot.status, EventStatus::Pending | EventStatus::Ready)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Propagates the terminal state of `idx` to its successors.
    ///
    /// Returns the successors skipped transitively because of upstream failure.
    pub fn resolve(
        &mut self,
        graph: &EventGraph,
        idx: usize,
        at: Duration,
        default_policy: FailurePolicy,
        dependency_timeout: Option<Duration>,
    ) -> Vec<usize> {
        let mut skipped = Vec::new();
        let mut work = vec![idx];
        while let Some(current) = work.pop() {
            let current_status = self.slots[current].status;
            let succeeded = current_status == EventStatus::Completed;
            for &succ in graph.successors_of(current) {
                if self.slots[succ].status.is_terminal() {
                    continue;
                }
                let policy = graph
                    .event_at(succ)
                    .failure_policy
                    .unwrap_or(default_policy);
                if !succeeded && policy == FailurePolicy::PropagateSkip {
                    let upstream = &graph.event_at(current).id;
                    let reason = SimError::new(
                        ErrorKind::UpstreamFailed,
                        format!("dependency {upstream} ended {current_status:?}"),
                    );
                    self.skip(succ, at, reason);
                    skipped.push(succ);
                    work.push(succ);
                    continue;
                }

                let slot = &mut self.slots[succ];
                slot.remaining = slot.remaining.saturating_sub(1);
                slot.latest_resolution = slot.latest_resolution.max(at);
                let first_resolution = slot.first_resolution.is_none();
                if first_resolution {
                    slot.first_resolution = Some(at);
                }
                let remaining = slot.remaining;
                let latest = slot.latest_resolution;
                if remaining == 0 {
                    let delay = graph.event_at(succ).delay;
                    self.push_timer(latest + delay, succ, TimerKind::Eligible);
                } else if first_resolution {
                    if let Some(timeout) = dependency_timeout {
                        self.push_timer(at + timeout, succ, TimerKind::DependencyTimeout);
                    }
                }
            }
        }
        skipped
    }

    fn settle(&mut self, idx: usize, at: Duration, status: EventStatus, result: EventResult) {
        let slot = &mut self.slots[idx];
        if slot.status.is_terminal() {
            return;
        }
        debug_assert!(slot.status.can_transition_to(status));
        slot.status = status;
        slot.result = Some(result);
        slot.finished_at = Some(at);
        slot.in_flight = false;
        self.terminal += 1;
    }

    fn is_live(&self, timer: &Timer) -> bool {
        let slot = &self.slots[timer.idx];
        match timer.kind {
            TimerKind::Eligible => slot.status == EventStatus::Pending && slot.remaining == 0,
            TimerKind::DependencyTimeout => {
                slot.status == EventStatus::Pending && slot.remaining > 0
            }
        }
    }

    fn push_timer(&mut self, at: Duration, idx: usize, kind: TimerKind) {
        self.seq += 1;
        self.timers.push(Reverse(Timer {
            at,
            idx,
            kind,
            seq: self.seq,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentsim_core_types::ToolCall;
    use agentsim_event_graph::{Event, EventKind, EventTarget};
    use serde_json::json;

    fn event(seq: usize, deps: &[usize], delay_ms: u64) -> Event {
        Event {
            id: EventId::sequential(seq),
            kind: EventKind::UserAction,
            target: EventTarget::Call(ToolCall::new("App", "noop", json!({}))),
            dependencies: deps.iter().map(|dep| EventId::sequential(*dep)).collect(),
            delay: Duration::from_millis(delay_ms),
            label: None,
            failure_policy: None,
        }
    }

    fn diamond() -> EventGraph {
        EventGraph::from_events(vec![
            event(1, &[], 0),
            event(2, &[1], 100),
            event(3, &[1], 300),
            event(4, &[2, 3], 50),
        ])
        .unwrap()
    }

    #[test]
    fn roots_are_seeded_at_their_delay() {
        let graph = EventGraph::from_events(vec![event(1, &[], 250), event(2, &[], 0)]).unwrap();
        let mut table = RunTable::new(&graph);
        assert_eq!(table.next_deadline(), Some(Duration::ZERO));
        assert_eq!(
            table.pop_due(Duration::ZERO),
            vec![(1, TimerKind::Eligible, Duration::ZERO)]
        );
        assert_eq!(table.next_deadline(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn join_waits_for_latest_predecessor_plus_delay() {
        let graph = diamond();
        let mut table = RunTable::new(&graph);
        let policy = FailurePolicy::PropagateSkip;

        table.pop_due(Duration::ZERO);
        table.mark_ready(0, Duration::ZERO);
        table.mark_running(0, Duration::ZERO);
        table.finish(0, Duration::from_millis(10), EventResult::Success { output: json!(1) });
        table.resolve(&graph, 0, Duration::from_millis(10), policy, None);

        let due = table.pop_due(Duration::from_millis(400));
        assert_eq!(
            due,
            vec![
                (1, TimerKind::Eligible, Duration::from_millis(110)),
                (2, TimerKind::Eligible, Duration::from_millis(310)),
            ]
        );
        for (idx, finished) in [(1, 150), (2, 320)] {
            table.mark_ready(idx, Duration::ZERO);
            table.mark_running(idx, Duration::ZERO);
            let at = Duration::from_millis(finished);
            table.finish(idx, at, EventResult::Success { output: json!(null) });
            table.resolve(&graph, idx, at, policy, None);
        }
        assert_eq!(table.next_deadline(), Some(Duration::from_millis(370)));
    }

    #[test]
    fn failure_skips_successors_transitively() {
        let graph = diamond();
        let mut table = RunTable::new(&graph);
        table.pop_due(Duration::ZERO);
        table.mark_ready(0, Duration::ZERO);
        table.mark_running(0, Duration::ZERO);
        table.finish(
            0,
            Duration::ZERO,
            EventResult::Failure {
                error: SimError::capability("boom"),
            },
        );
        let mut skipped = table.resolve(&graph, 0, Duration::ZERO, FailurePolicy::PropagateSkip, None);
        skipped.sort_unstable();
        assert_eq!(skipped, vec![1, 2, 3]);
        assert!(table.is_done());
        let reason = table.slot(3).result.as_ref().and_then(EventResult::error).unwrap();
        assert_eq!(reason.kind(), ErrorKind::UpstreamFailed);
        assert_eq!(table.next_deadline(), None);
    }

    #[test]
    fn attempt_anyway_treats_failure_as_resolved() {
        let graph = diamond();
        let mut table = RunTable::new(&graph);
        table.pop_due(Duration::ZERO);
        table.mark_ready(0, Duration::ZERO);
        table.mark_running(0, Duration::ZERO);
        table.finish(
            0,
            Duration::ZERO,
            EventResult::Failure {
                error: SimError::capability("boom"),
            },
        );
        let skipped = table.resolve(&graph, 0, Duration::ZERO, FailurePolicy::AttemptAnyway, None);
        assert!(skipped.is_empty());
        assert_eq!(table.next_deadline(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn dependency_timeout_starts_at_first_resolution() {
        let graph = diamond();
        let mut table = RunTable::new(&graph);
        let timeout = Some(Duration::from_secs(1));
        table.pop_due(Duration::ZERO);
        for idx in [0, 1] {
            table.pop_due(Duration::from_millis(100));
            table.mark_ready(idx, Duration::ZERO);
            table.mark_running(idx, Duration::ZERO);
            let at = Duration::from_millis(100);
            table.finish(idx, at, EventResult::Success { output: json!(null) });
            table.resolve(&graph, idx, at, FailurePolicy::PropagateSkip, timeout);
        }
        let due = table.pop_due(Duration::from_millis(1100));
        assert!(due.contains(&(3, TimerKind::DependencyTimeout, Duration::from_millis(1100))));
    }

    #[test]
    fn dispatched_events_are_not_waiting() {
        let graph = EventGraph::from_events(vec![event(1, &[], 0), event(2, &[], 0)]).unwrap();
        let mut table = RunTable::new(&graph);
        table.pop_due(Duration::ZERO);
        table.mark_ready(0, Duration::ZERO);
        table.mark_ready(1, Duration::ZERO);
        table.mark_dispatched(0);

        assert_eq!(table.status(0), EventStatus::Ready);
        assert_eq!(table.waiting(), vec![1]);
        assert_eq!(table.in_flight(), vec![0]);

        let error = SimError::timeout("no decision");
        table.finish(0, Duration::from_secs(5), EventResult::Failure { error });
        assert!(table.in_flight().is_empty());
        assert_eq!(table.slot(0).started_at, None);
    }
}
