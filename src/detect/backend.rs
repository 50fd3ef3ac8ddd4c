use std::sync::Arc;

use anyhow::Result;
use ndarray::ArrayD;

use crate::event::Completer;
use crate::frame::Frame;

/// Raw per-scale network outputs, coarsest grid first.
pub type FeatureMaps = Vec<ArrayD<f32>>;

/// Inference service seam.
///
/// `submit` hands one frame to the network and returns immediately. The
/// service owns `done` until it finishes and must either complete it or drop
/// it; both post exactly one event back to the scheduler. Implementations
/// must not hold on to `frame` after completing.
pub trait InferenceService: Send {
    /// Service identifier.
    fn name(&self) -> &'static str;

    fn submit(&mut self, frame: Arc<Frame>, done: Completer<FeatureMaps>);

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
