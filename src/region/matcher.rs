use crate::detect::Prediction;
use crate::geometry::{AffineTransform, ModelViewport, Rect};
use crate::region::detector::DetectedRegion;

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Best-overlapping region for one prediction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionMatch {
    pub index: usize,
    pub iou: f32,
}

/// Picks the detected region that best overlaps a prediction on screen.
#[derive(Clone, Copy, Debug)]
pub struct RegionMatcher {
    viewport: ModelViewport,
    threshold: f32,
}

impl Default for RegionMatcher {
    fn default() -> Self {
        Self::new(ModelViewport::default(), DEFAULT_MATCH_THRESHOLD)
    }
}

impl RegionMatcher {
    pub fn new(viewport: ModelViewport, threshold: f32) -> Self {
        Self {
            viewport,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Index of the region whose screen rectangle has the highest IOU with
    /// `prediction`, if that IOU is strictly above the threshold.
    ///
    /// Equal IOUs resolve to the lower index.
    pub fn best_match(
        &self,
        prediction: &Prediction,
        regions: &[DetectedRegion],
        display_transform: &AffineTransform,
        screen_bounds: &Rect,
    ) -> Option<RegionMatch> {
        let predicted = self.viewport.to_screen(&prediction.rect, screen_bounds);

        let mut best: Option<RegionMatch> = None;
        for (index, region) in regions.iter().enumerate() {
            let iou = predicted.iou(&region.screen_rect(display_transform));
            log::trace!("region {} iou {:.3}", index, iou);
            if best.map_or(true, |b| iou > b.iou) {
                best = Some(RegionMatch { index, iou });
            }
        }

        best.filter(|b| b.iou > self.threshold)
    }
}
