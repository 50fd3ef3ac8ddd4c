use crate::geometry::Rect;

/// One scored, labeled box in model-input pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// Objectness times best-class probability, in `[0, 1]`.
    pub score: f32,
    pub rect: Rect,
}
