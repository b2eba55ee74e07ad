use std::time::Duration;

use tokio::time::Instant;

use crate::model::ClockMode;

/// Run clock measured as an offset from run start.
///
/// The virtual clock only moves when the dispatch loop advances it; the real
/// clock follows tokio time, so paused-time tests drive both the same way.
#[derive(Debug)]
pub enum RunClock {
    Virtual { now: Duration },
    Real { origin: Instant },
}

impl RunClock {
    pub fn start(mode: ClockMode) -> Self {
        match mode {
            ClockMode::Virtual => RunClock::Virtual {
                now: Duration::ZERO,
            },
            ClockMode::RealTime => RunClock::Real {
                origin: Instant::now(),
            },
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, RunClock::Virtual { .. })
    }

    pub fn now(&self) -> Duration {
        match self {
            RunClock::Virtual { now } => *now,
            RunClock::Real { origin } => origin.elapsed(),
        }
    }

    /// Moves a virtual clock forward to `at`. Never moves backwards; no-op on
    /// the real clock.
    pub fn advance_to(&mut self, at: Duration) {
        if let RunClock::Virtual { now } = self {
            if at > *now {
                *now = at;
            }
        }
    }

    /// Tokio instant corresponding to offset `at`, for real-time sleeps.
    pub fn instant_at(&self, at: Duration) -> Option<Instant> {
        match self {
            RunClock::Virtual { .. } => None,
            RunClock::Real { origin } => Some(*origin + at),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
