//! Tracked-target lifecycle and the reference-image hand-off to the
//! external tracking subsystem.

mod lifecycle;
mod reference;

pub use lifecycle::{
    LifecyclePhase, LifecycleSignal, TrackedTarget, TrackedTargetLifecycle, DEFAULT_LOSS_TIMEOUT,
};
pub use reference::{
    AcceptingValidator, AnchorId, AnchorUpdate, ReferenceCandidate, ReferenceId, ReferenceImage,
    ReferenceValidator, DEFAULT_REFERENCE_WIDTH,
};
