use std::fmt;

use anyhow::{anyhow, Result};

use crate::event::Completer;
use crate::frame::CorrectedImage;
use crate::geometry::Size;

/// Physical width assumed for every reference image, in metres.
pub const DEFAULT_REFERENCE_WIDTH: f32 = 0.07;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceId(pub u64);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref-{}", self.0)
    }
}

/// Handle the tracking subsystem assigned to a found reference image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AnchorId(pub u64);

/// A validated image the tracking subsystem can follow.
#[derive(Clone, Debug)]
pub struct ReferenceImage {
    pub id: ReferenceId,
    pub image: CorrectedImage,
    /// Width and height in metres.
    pub physical_size: Size,
}

/// A matched region's corrected image awaiting validation.
#[derive(Clone, Debug)]
pub struct ReferenceCandidate {
    /// Ticket the validation result must carry.
    pub candidate: u64,
    pub class_label: String,
    pub image: CorrectedImage,
    pub physical_width: f32,
}

/// Tracking-subsystem report about one anchor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnchorUpdate {
    pub anchor: AnchorId,
    pub reference: ReferenceId,
    pub is_tracked: bool,
}

/// Reference-image feasibility check seam.
pub trait ReferenceValidator: Send {
    fn name(&self) -> &'static str;

    fn validate(&mut self, candidate: ReferenceCandidate, done: Completer<ReferenceImage>);
}

/// Accepts every non-degenerate image, assigning sequential ids.
pub struct AcceptingValidator {
    next_id: u64,
}

impl AcceptingValidator {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    fn check(&mut self, candidate: ReferenceCandidate) -> Result<ReferenceImage> {
        let image = candidate.image;
        if image.width == 0 || image.height == 0 || image.pixels().is_empty() {
            return Err(anyhow!(
                "reference image for candidate {} is degenerate ({}x{})",
                candidate.candidate,
                image.width,
                image.height
            ));
        }
        if candidate.physical_width.is_nan() || candidate.physical_width <= 0.0 {
            return Err(anyhow!(
                "physical width {} must be positive",
                candidate.physical_width
            ));
        }
        let id = ReferenceId(self.next_id);
        self.next_id += 1;
        let physical_size = Size::new(
            candidate.physical_width,
            candidate.physical_width * image.aspect(),
        );
        Ok(ReferenceImage {
            id,
            image,
            physical_size,
        })
    }
}

impl Default for AcceptingValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceValidator for AcceptingValidator {
    fn name(&self) -> &'static str {
        "accepting"
    }

    fn validate(&mut self, candidate: ReferenceCandidate, done: Completer<ReferenceImage>) {
        done.complete(self.check(candidate));
    }
}
