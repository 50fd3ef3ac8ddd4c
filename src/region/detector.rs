use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::event::Completer;
use crate::frame::{CorrectedImage, Frame};
use crate::geometry::{AffineTransform, Quad, Rect};

/// One quadrilateral found by the external region detector.
#[derive(Clone, Debug)]
pub struct DetectedRegion {
    /// Corners in normalized image space.
    pub quad: Quad,
    pub confidence: f32,
    /// Perspective-corrected crop of the region, when the detector could
    /// produce one.
    pub corrected: Option<CorrectedImage>,
}

impl DetectedRegion {
    pub fn new(quad: Quad, confidence: f32) -> Self {
        Self {
            quad,
            confidence,
            corrected: None,
        }
    }

    pub fn with_corrected(mut self, image: CorrectedImage) -> Self {
        self.corrected = Some(image);
        self
    }

    /// Bounding rectangle in screen pixels under `display_transform`.
    pub fn screen_rect(&self, display_transform: &AffineTransform) -> Rect {
        self.quad.bounding_box().apply(display_transform)
    }
}

/// Parameters forwarded verbatim to the region detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionQuery {
    pub max_observations: usize,
    /// Minimum region size relative to the image, `0..1`.
    pub minimum_size: f32,
    pub minimum_aspect_ratio: f32,
    pub minimum_confidence: f32,
}

impl Default for RegionQuery {
    fn default() -> Self {
        Self {
            max_observations: 5,
            minimum_size: 0.2,
            minimum_aspect_ratio: 0.3,
            minimum_confidence: 0.0,
        }
    }
}

/// Region-detection service seam.
///
/// Same contract as the inference seam: return immediately, complete or drop
/// `done` exactly once, release `frame` when finished.
pub trait RegionDetector: Send {
    fn name(&self) -> &'static str;

    fn submit(&mut self, frame: Arc<Frame>, query: &RegionQuery, done: Completer<Vec<DetectedRegion>>);
}

/// Synchronous region detector returning a fixed answer.
pub struct StubRegionDetector {
    regions: Vec<DetectedRegion>,
    failure: Option<String>,
    last_query: Option<RegionQuery>,
}

impl StubRegionDetector {
    pub fn new(regions: Vec<DetectedRegion>) -> Self {
        Self {
            regions,
            failure: None,
            last_query: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            regions: Vec::new(),
            failure: Some(message.into()),
            last_query: None,
        }
    }

    pub fn set_regions(&mut self, regions: Vec<DetectedRegion>) {
        self.regions = regions;
        self.failure = None;
    }

    pub fn last_query(&self) -> Option<&RegionQuery> {
        self.last_query.as_ref()
    }
}

impl Default for StubRegionDetector {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RegionDetector for StubRegionDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn submit(&mut self, _frame: Arc<Frame>, query: &RegionQuery, done: Completer<Vec<DetectedRegion>>) {
        self.last_query = Some(query.clone());
        let result = match &self.failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self
                .regions
                .iter()
                .filter(|r| r.confidence >= query.minimum_confidence)
                .take(query.max_observations)
                .cloned()
                .collect()),
        };
        done.complete(result);
    }
}
