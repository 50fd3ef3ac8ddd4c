//! Messages flowing back into the scheduler context.
//!
//! External services run on their own worker context. They never call into
//! the scheduler directly; they finish a [`Completer`], which posts an
//! [`Event`] on the scheduler's channel. The tracking subsystem posts anchor
//! events the same way.

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use ndarray::ArrayD;

use crate::region::DetectedRegion;
use crate::tracking::{AnchorUpdate, ReferenceImage};

#[derive(Debug)]
pub enum Event {
    InferenceFinished {
        cycle: u64,
        result: Result<Vec<ArrayD<f32>>>,
    },
    RegionsDetected {
        cycle: u64,
        result: Result<Vec<DetectedRegion>>,
    },
    ReferenceValidated {
        candidate: u64,
        result: Result<ReferenceImage>,
    },
    AnchorAdded(AnchorUpdate),
    AnchorUpdated(AnchorUpdate),
    ResetTracking,
}

impl Event {
    pub fn inference_finished(cycle: u64, result: Result<Vec<ArrayD<f32>>>) -> Event {
        Event::InferenceFinished { cycle, result }
    }

    pub fn regions_detected(cycle: u64, result: Result<Vec<DetectedRegion>>) -> Event {
        Event::RegionsDetected { cycle, result }
    }

    pub fn reference_validated(candidate: u64, result: Result<ReferenceImage>) -> Event {
        Event::ReferenceValidated { candidate, result }
    }
}

/// One-shot reply handle handed to an external service.
///
/// Exactly one event is posted per completer: the result passed to
/// [`Completer::complete`], or a failure if the completer is dropped first.
pub struct Completer<T> {
    ticket: u64,
    tx: Option<Sender<Event>>,
    wrap: fn(u64, Result<T>) -> Event,
}

impl<T> Completer<T> {
    pub fn new(ticket: u64, tx: Sender<Event>, wrap: fn(u64, Result<T>) -> Event) -> Self {
        Self {
            ticket,
            tx: Some(tx),
            wrap,
        }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn complete(mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            if tx.send((self.wrap)(self.ticket, result)).is_err() {
                log::debug!("scheduler gone, dropping completion for request {}", self.ticket);
            }
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let abandoned = anyhow!("request {} dropped without completion", self.ticket);
            let _ = tx.send((self.wrap)(self.ticket, Err(abandoned)));
        }
    }
}
