//! Trailing-edge debounce state machine.
//!
//! The caller supplies every instant, so the machine never reads a clock and
//! the driver can be exercised under tokio's paused time.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending { deadline: Instant },
}

/// Collapses a burst of events into one fire, `interval` after the last event.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    state: State,
}

impl Debouncer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: State::Idle,
        }
    }

    /// Record an event at `now`, (re)arming the deadline.
    pub fn on_event(&mut self, now: Instant) {
        self.state = State::Pending {
            deadline: now + self.interval,
        };
    }

    /// Returns `true` exactly once per burst, when `now` has reached the deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            State::Pending { deadline } if now >= deadline => {
                self.state = State::Idle;
                true
            },
            _ => false,
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Pending { deadline } => Some(deadline),
            State::Idle => None,
        }
    }

    /// Drop a pending deadline without firing.
    pub fn cancel(&mut self) {
        self.state = State::Idle;
    }
}
