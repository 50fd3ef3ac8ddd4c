//! Object-detection decoding: raw multi-scale tensors to ranked boxes.

mod backend;
pub mod backends;
mod decoder;
mod nms;
mod prediction;
mod scale;
pub mod tensor;

pub use backend::{FeatureMaps, InferenceService};
pub use backends::{StubInference, SyntheticInference, SyntheticScene};
pub use decoder::{FeatureDecoder, DEFAULT_CONFIDENCE_THRESHOLD};
pub use nms::{
    non_max_suppression, NonMaxSuppressor, DEFAULT_MAX_BOXES, DEFAULT_OVERLAP_THRESHOLD,
};
pub use prediction::Prediction;
pub use scale::{
    ScaleConfig, ScalePyramid, BOX_FIELDS, DEFAULT_ACTIVE_SCALES, DEFAULT_ANCHORS,
    DEFAULT_BLOCK_STRIDE, DEFAULT_BOXES_PER_CELL, DEFAULT_GRID_SIZES, DEFAULT_NUM_CLASSES,
};
