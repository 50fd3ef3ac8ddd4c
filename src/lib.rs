//! Scene Anchor
//!
//! Real-time scene understanding for a camera feed: decode a multi-scale
//! object detector's raw outputs, reconcile the best box with independently
//! detected quadrilateral regions, and keep at most one physical object
//! tracked at a time.
//!
//! # Architecture
//!
//! ```text
//! frame -> inference -> FeatureDecoder -> NonMaxSuppressor -> top box
//!       -> region detection -> RegionMatcher -> TrackedTargetLifecycle
//! ```
//!
//! Inference, region detection, reference validation and the camera session
//! are external services behind traits. They reply through one-shot
//! completers that post events to the [`DetectionScheduler`], which owns all
//! mutable pipeline state.
//!
//! Two invariants hold by construction:
//!
//! 1. **Single flight**: at most one detection cycle is in flight.
//! 2. **Single target**: at most one tracked target exists, and detection is
//!    suspended while one is being acquired or tracked.
//!
//! # Module Structure
//!
//! - `detect`: tensor decoding, non-max suppression, inference seam
//! - `region`: detected regions, region-detector seam, matching
//! - `tracking`: target lifecycle and reference-image hand-off
//! - `scheduler`: cadence, cycle guard, event handling
//! - `geometry`, `frame`, `timer`, `event`, `config`: shared plumbing

pub mod config;
pub mod detect;
pub mod event;
pub mod frame;
pub mod geometry;
pub mod region;
pub mod scheduler;
pub mod timer;
pub mod tracking;

pub use config::PipelineConfig;
pub use detect::{FeatureDecoder, InferenceService, NonMaxSuppressor, Prediction, ScalePyramid};
pub use event::{Completer, Event};
pub use frame::{CorrectedImage, Frame, FrameSnapshot, FrameSource};
pub use geometry::{AffineTransform, ModelViewport, Orientation, Point, Quad, Rect, Size};
pub use region::{DetectedRegion, RegionDetector, RegionMatch, RegionMatcher, RegionQuery};
pub use scheduler::{CycleGuard, CycleStats, DetectionScheduler, Services, TickOutcome};
pub use tracking::{
    AnchorId, AnchorUpdate, LifecyclePhase, LifecycleSignal, ReferenceImage, ReferenceValidator,
    TrackedTarget, TrackedTargetLifecycle,
};
