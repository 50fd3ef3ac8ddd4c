#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use scene_anchor::detect::tensor::{plant, zero_outputs, PlantedBox};
use scene_anchor::detect::{FeatureMaps, InferenceService, ScalePyramid};
use scene_anchor::tracking::{ReferenceCandidate, ReferenceValidator};
use scene_anchor::{
    AffineTransform, Completer, CorrectedImage, DetectedRegion, Frame, FrameSnapshot,
    FrameSource, ModelViewport, Quad, Rect, ReferenceImage,
};

pub const SCREEN: Rect = Rect::new(0.0, 0.0, 416.0, 800.0);

/// Model-space rect of `PlantedBox::strong(6, 6, 0, _)` on the coarse scale.
pub const PLANTED_RECT: Rect = Rect::new(208.0 - 58.0, 208.0 - 45.0, 116.0, 90.0);

pub fn display_transform() -> AffineTransform {
    AffineTransform::scale(SCREEN.width, SCREEN.height)
}

/// Outputs with one strong object of `class_index` at coarse cell (6, 6).
pub fn planted_outputs(class_index: usize) -> FeatureMaps {
    let pyramid = ScalePyramid::default();
    let mut outputs = zero_outputs(&pyramid);
    plant(
        &mut outputs[0],
        &pyramid.scales[0],
        &PlantedBox::strong(6, 6, 0, class_index),
    )
    .expect("plant");
    outputs
}

pub fn empty_outputs() -> FeatureMaps {
    zero_outputs(&ScalePyramid::default())
}

/// A region lying exactly under the planted object on screen.
pub fn matching_region() -> DetectedRegion {
    let on_screen = ModelViewport::default().to_screen(&PLANTED_RECT, &SCREEN);
    let normalized = on_screen.to_normalized(SCREEN.width, SCREEN.height);
    DetectedRegion::new(Quad::from_rect(&normalized), 0.9)
        .with_corrected(CorrectedImage::new(vec![200; 30 * 45], 30, 45))
}

pub fn disjoint_region() -> DetectedRegion {
    DetectedRegion::new(Quad::from_rect(&Rect::new(0.0, 0.0, 0.05, 0.05)), 0.9)
        .with_corrected(CorrectedImage::new(vec![200; 4], 2, 2))
}

/// Frame source handing out one shared frame, or a failure.
pub struct TestCamera {
    pub frame: Arc<Frame>,
    pub fail: bool,
}

impl TestCamera {
    pub fn new() -> Self {
        Self {
            frame: Arc::new(Frame::new(vec![0; 64], 8, 8).expect("frame")),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl FrameSource for TestCamera {
    fn current_frame(&mut self) -> Result<Option<FrameSnapshot>> {
        if self.fail {
            return Err(anyhow!("camera session interrupted"));
        }
        Ok(Some(FrameSnapshot {
            frame: self.frame.clone(),
            display_transform: display_transform(),
            screen_bounds: SCREEN,
        }))
    }
}

/// Inference that parks completers until the test releases them.
#[derive(Clone, Default)]
pub struct HeldInference {
    pub pending: Arc<Mutex<Vec<Completer<FeatureMaps>>>>,
}

impl HeldInference {
    pub fn complete_next(&self, result: Result<FeatureMaps>) {
        let done = self.pending.lock().expect("lock").remove(0);
        done.complete(result);
    }
}

impl InferenceService for HeldInference {
    fn name(&self) -> &'static str {
        "held"
    }

    fn submit(&mut self, _frame: Arc<Frame>, done: Completer<FeatureMaps>) {
        self.pending.lock().expect("lock").push(done);
    }
}

/// Inference that loses every request.
pub struct DroppingInference;

impl InferenceService for DroppingInference {
    fn name(&self) -> &'static str {
        "dropping"
    }

    fn submit(&mut self, _frame: Arc<Frame>, done: Completer<FeatureMaps>) {
        drop(done);
    }
}

/// Validator that parks candidates until the test releases them.
#[derive(Clone, Default)]
pub struct HeldValidator {
    pub pending: Arc<Mutex<Vec<(ReferenceCandidate, Completer<ReferenceImage>)>>>,
}

impl ReferenceValidator for HeldValidator {
    fn name(&self) -> &'static str {
        "held"
    }

    fn validate(&mut self, candidate: ReferenceCandidate, done: Completer<ReferenceImage>) {
        self.pending.lock().expect("lock").push((candidate, done));
    }
}
