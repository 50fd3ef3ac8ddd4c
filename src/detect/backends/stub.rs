use std::sync::Arc;

use anyhow::anyhow;

use crate::detect::backend::{FeatureMaps, InferenceService};
use crate::event::Completer;
use crate::frame::Frame;

/// Synchronous inference stub. Completes every request immediately with a
/// preset output or a preset failure.
pub struct StubInference {
    outputs: Option<FeatureMaps>,
    failure: Option<String>,
    submitted: u64,
}

impl StubInference {
    /// Stub that answers every request with `outputs`.
    pub fn new(outputs: FeatureMaps) -> Self {
        Self {
            outputs: Some(outputs),
            failure: None,
            submitted: 0,
        }
    }

    /// Stub that fails every request with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outputs: None,
            failure: Some(message.into()),
            submitted: 0,
        }
    }

    pub fn set_outputs(&mut self, outputs: FeatureMaps) {
        self.outputs = Some(outputs);
        self.failure = None;
    }

    /// Number of frames handed to this stub so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl Default for StubInference {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InferenceService for StubInference {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn submit(&mut self, _frame: Arc<Frame>, done: Completer<FeatureMaps>) {
        self.submitted += 1;
        let result = match (&self.failure, &self.outputs) {
            (Some(message), _) => Err(anyhow!("{}", message)),
            (None, Some(outputs)) => Ok(outputs.clone()),
            (None, None) => Err(anyhow!("stub inference has no outputs")),
        };
        done.complete(result);
    }
}
