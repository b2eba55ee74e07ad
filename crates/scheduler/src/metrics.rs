use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Counters for one run. Each run owns its own set.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    agent_requests: AtomicU64,
    agent_timeouts: AtomicU64,
    oracle_satisfied: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SchedulerMetrics {
    pub fn record_dispatched(&self) {
        increment(&self.dispatched);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    pub fn record_returned(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        increment(&self.completed);
    }

    pub fn record_failed(&self) {
        increment(&self.failed);
    }

    pub fn record_skipped(&self) {
        increment(&self.skipped);
    }

    pub fn record_agent_request(&self) {
        increment(&self.agent_requests);
    }

    pub fn record_agent_timeout(&self) {
        increment(&self.agent_timeouts);
    }

    pub fn record_oracle_satisfied(&self) {
        increment(&self.oracle_satisfied);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            agent_requests: self.agent_requests.load(Ordering::Relaxed),
            agent_timeouts: self.agent_timeouts.load(Ordering::Relaxed),
            oracle_satisfied: self.oracle_satisfied.load(Ordering::Relaxed),
            max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub agent_requests: u64,
    pub agent_timeouts: u64,
    pub oracle_satisfied: u64,
    pub max_in_flight: usize,
}
