//! Cancellable timers for the loss timeout and the detection cadence.
//!
//! The two are independent: the lifecycle owns at most one [`TimerHandle`]
//! and the scheduler run loop owns one [`Cadence`]. Deadlines also answer
//! `is_expired(now)` so tests can drive time without sleeping.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

/// One-shot deadline.
///
/// Dropping the handle cancels it. Restarting means replacing the handle;
/// the handle's receiver always carries the latest deadline.
#[derive(Debug)]
pub struct TimerHandle {
    deadline: Instant,
    fired: Receiver<Instant>,
}

impl TimerHandle {
    pub fn start(interval: Duration, now: Instant) -> Self {
        let deadline = now + interval;
        Self {
            deadline,
            fired: crossbeam_channel::at(deadline),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Receiver that yields once the deadline passes, for `select!`.
    pub fn receiver(&self) -> &Receiver<Instant> {
        &self.fired
    }
}

/// Fixed-interval ticker for the detection cadence.
#[derive(Debug)]
pub struct Cadence {
    interval: Duration,
    ticks: Receiver<Instant>,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticks: crossbeam_channel::tick(interval),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn receiver(&self) -> &Receiver<Instant> {
        &self.ticks
    }
}
