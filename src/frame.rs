//! Camera frame containers.
//!
//! - `Frame`: immutable pixel buffer for one captured camera image. Shared
//!   with external services through `Arc` for the lifetime of one detection
//!   cycle only.
//! - `FrameSnapshot`: a frame plus the display geometry that was current
//!   when it was captured.
//! - `CorrectedImage`: a perspective-corrected crop produced by the region
//!   detector, used as the candidate reference image.
//! - `FrameSource`: the seam to the external camera/session layer.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::geometry::{AffineTransform, Rect};

/// One captured camera image. Bytes are private and never mutated.
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a packed pixel buffer. The buffer length must be a whole number
    /// of rows.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let row_count = height as usize;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if pixels.len() % row_count != 0 {
            return Err(anyhow!(
                "frame buffer of {} bytes is not a whole number of {} rows",
                pixels.len(),
                height
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn age(&self) -> std::time::Duration {
        self.captured_at.elapsed()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// A frame together with the display geometry current at capture time.
#[derive(Clone, Debug)]
pub struct FrameSnapshot {
    pub frame: Arc<Frame>,
    /// Normalized-image to screen transform for this frame.
    pub display_transform: AffineTransform,
    pub screen_bounds: Rect,
}

/// Perspective-corrected crop of one detected region.
#[derive(Clone)]
pub struct CorrectedImage {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl CorrectedImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Height over width, or zero for a degenerate image.
    pub fn aspect(&self) -> f32 {
        if self.width == 0 {
            0.0
        } else {
            self.height as f32 / self.width as f32
        }
    }
}

impl fmt::Debug for CorrectedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrectedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Source of the current camera frame.
///
/// Returns `Ok(None)` when the session has not produced a frame yet.
pub trait FrameSource: Send {
    fn current_frame(&mut self) -> Result<Option<FrameSnapshot>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_ragged_buffers() {
        assert!(Frame::new(vec![0; 10], 4, 3).is_err());
        assert!(Frame::new(vec![], 0, 0).is_err());
        let frame = Frame::new(vec![7; 12], 4, 3).expect("frame");
        assert_eq!(frame.byte_len(), 12);
        assert_eq!(frame.pixels()[0], 7);
    }

    #[test]
    fn corrected_image_aspect() {
        assert_eq!(CorrectedImage::new(vec![0; 8], 4, 2).aspect(), 0.5);
        assert_eq!(CorrectedImage::new(vec![], 0, 2).aspect(), 0.0);
    }
}
