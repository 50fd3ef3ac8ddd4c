use anyhow::{anyhow, Result};
use ndarray::{ArrayD, ArrayView3, Axis, Ix3};

use crate::detect::prediction::Prediction;
use crate::detect::scale::{ScalePyramid, BOX_FIELDS};
use crate::geometry::Rect;

/// Default minimum for objectness times class probability.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax over `values`, in place.
fn softmax_in_place(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

/// Index and value of the first maximum.
fn argmax(values: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::NEG_INFINITY);
    for (idx, &v) in values.iter().enumerate() {
        if v > best.1 {
            best = (idx, v);
        }
    }
    best
}

/// Turns raw multi-scale network outputs into scored, labeled boxes.
///
/// Tensors are laid out `[channels, grid_height, grid_width]` with
/// `channels = boxes_per_cell * (num_classes + 5)`. For box slot `b` the
/// channels at `b * (num_classes + 5) + {0..5}` hold `tx, ty, tw, th, tc`,
/// followed by `num_classes` class logits.
#[derive(Clone, Debug)]
pub struct FeatureDecoder {
    pyramid: ScalePyramid,
    confidence_threshold: f32,
}

impl FeatureDecoder {
    pub fn new(pyramid: ScalePyramid, confidence_threshold: f32) -> Self {
        Self {
            pyramid,
            confidence_threshold,
        }
    }

    pub fn pyramid(&self) -> &ScalePyramid {
        &self.pyramid
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Check externally produced tensors and view the active ones as 3-D.
    ///
    /// Leading unit axes (batch) are dropped. Only the active scales are
    /// checked and returned; trailing outputs for inactive scales are
    /// accepted as-is.
    pub fn feature_views<'a>(&self, outputs: &'a [ArrayD<f32>]) -> Result<Vec<ArrayView3<'a, f32>>> {
        let active = self.pyramid.active_scales();
        if outputs.len() < active.len() {
            return Err(anyhow!(
                "inference produced {} feature maps, decoder needs {}",
                outputs.len(),
                active.len()
            ));
        }

        let mut views = Vec::with_capacity(active.len());
        for (level, (output, scale)) in outputs.iter().zip(active).enumerate() {
            let mut view = output.view();
            while view.ndim() > 3 {
                if view.shape()[0] != 1 {
                    return Err(anyhow!(
                        "feature map {} has non-unit leading axis in shape {:?}",
                        level,
                        output.shape()
                    ));
                }
                view = view.index_axis_move(Axis(0), 0);
            }
            let view = view
                .into_dimensionality::<Ix3>()
                .map_err(|e| anyhow!("feature map {} is not 3-D: {}", level, e))?;
            if view.shape() != scale.shape() {
                return Err(anyhow!(
                    "feature map {} has shape {:?}, expected {:?}",
                    level,
                    view.shape(),
                    scale.shape()
                ));
            }
            views.push(view);
        }
        Ok(views)
    }

    /// Decode the active scales of `maps` into predictions above the
    /// confidence threshold.
    ///
    /// `maps[i]` must have exactly the shape of scale `i`. Anything else is a
    /// caller bug and panics; use [`FeatureDecoder::feature_views`] to check
    /// untrusted tensors first. Output order is emission order (scale, row,
    /// column, box slot) and carries no ranking.
    pub fn decode(&self, maps: &[ArrayView3<'_, f32>]) -> Vec<Prediction> {
        let active = self.pyramid.active_scales();
        assert!(
            maps.len() >= active.len(),
            "decode needs {} feature maps, got {}",
            active.len(),
            maps.len()
        );

        let mut predictions = Vec::new();
        let mut classes = Vec::new();

        for (level, (map, scale)) in maps.iter().zip(active).enumerate() {
            assert_eq!(
                map.shape(),
                scale.shape(),
                "feature map {} does not match its scale",
                level
            );

            let level_divisor = 2f32.powi(level as i32);
            let num_classes = scale.num_classes;
            let box_span = num_classes + BOX_FIELDS;
            classes.resize(num_classes, 0.0);

            for cy in 0..scale.grid_height {
                for cx in 0..scale.grid_width {
                    for b in 0..scale.boxes_per_cell {
                        let channel = b * box_span;
                        let tx = map[[channel, cy, cx]];
                        let ty = map[[channel + 1, cy, cx]];
                        let tw = map[[channel + 2, cy, cx]];
                        let th = map[[channel + 3, cy, cx]];
                        let tc = map[[channel + 4, cy, cx]];

                        let x = (cx as f32 + sigmoid(tx)) * scale.stride / level_divisor;
                        let y = (cy as f32 + sigmoid(ty)) * scale.stride / level_divisor;

                        let [anchor_w, anchor_h] = scale.anchors[b];
                        let w = tw.exp() * anchor_w;
                        let h = th.exp() * anchor_h;

                        let confidence = sigmoid(tc);

                        for (c, slot) in classes.iter_mut().enumerate() {
                            *slot = map[[channel + BOX_FIELDS + c, cy, cx]];
                        }
                        softmax_in_place(&mut classes);
                        let (class_index, class_probability) = argmax(&classes);

                        let score = class_probability * confidence;
                        if score > self.confidence_threshold {
                            predictions.push(Prediction {
                                class_index,
                                score,
                                rect: Rect::from_center(x, y, w, h),
                            });
                        }
                    }
                }
            }
        }

        log::trace!("decoded {} predictions above threshold", predictions.len());
        predictions
    }
}
