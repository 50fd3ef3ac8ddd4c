use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Number of values per box slot besides the class logits: tx, ty, tw, th, tc.
pub const BOX_FIELDS: usize = 5;

pub const DEFAULT_NUM_CLASSES: usize = 22;
pub const DEFAULT_BOXES_PER_CELL: usize = 3;
pub const DEFAULT_BLOCK_STRIDE: f32 = 32.0;
pub const DEFAULT_GRID_SIZES: [usize; 3] = [13, 26, 52];
pub const DEFAULT_ACTIVE_SCALES: usize = 2;

/// YOLOv3 anchor priors for a 416 input, coarsest grid first.
pub const DEFAULT_ANCHORS: [[[f32; 2]; 3]; 3] = [
    [[116.0, 90.0], [156.0, 198.0], [373.0, 326.0]],
    [[30.0, 61.0], [62.0, 45.0], [59.0, 119.0]],
    [[10.0, 13.0], [16.0, 30.0], [33.0, 23.0]],
];

/// Constants for one output scale of the network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub grid_height: usize,
    pub grid_width: usize,
    /// Pixels per grid cell before the pyramid-level divisor.
    pub stride: f32,
    pub boxes_per_cell: usize,
    pub num_classes: usize,
    /// `[width, height]` prior per box slot, in model-input pixels.
    pub anchors: Vec<[f32; 2]>,
}

impl ScaleConfig {
    /// Channel count of this scale's tensor.
    pub fn channels(&self) -> usize {
        self.boxes_per_cell * (self.num_classes + BOX_FIELDS)
    }

    /// Expected `[channels, grid_height, grid_width]` shape.
    pub fn shape(&self) -> [usize; 3] {
        [self.channels(), self.grid_height, self.grid_width]
    }

    pub fn element_count(&self) -> usize {
        self.channels() * self.grid_height * self.grid_width
    }

    fn validate(&self, level: usize) -> Result<()> {
        if self.grid_height == 0 || self.grid_width == 0 {
            return Err(anyhow!("scale {} has an empty grid", level));
        }
        if self.boxes_per_cell == 0 || self.num_classes == 0 {
            return Err(anyhow!(
                "scale {} needs at least one box slot and one class",
                level
            ));
        }
        if self.anchors.len() != self.boxes_per_cell {
            return Err(anyhow!(
                "scale {} has {} anchors for {} box slots",
                level,
                self.anchors.len(),
                self.boxes_per_cell
            ));
        }
        if self.stride.is_nan() || self.stride <= 0.0 {
            return Err(anyhow!("scale {} stride must be positive", level));
        }
        Ok(())
    }
}

/// All scales the network emits, coarsest grid first.
///
/// Scale `i` is decoded with a position divisor of `2^i`. Only the first
/// `active` scales are decoded; the rest are defined so that a full
/// inference output can be shape-described, but are skipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalePyramid {
    pub scales: Vec<ScaleConfig>,
    pub active: usize,
}

impl Default for ScalePyramid {
    fn default() -> Self {
        Self::yolov3_416(DEFAULT_NUM_CLASSES)
    }
}

impl ScalePyramid {
    /// Three-scale 416 layout (13, 26, 52 grids) with two active scales.
    pub fn yolov3_416(num_classes: usize) -> Self {
        let scales = DEFAULT_GRID_SIZES
            .iter()
            .zip(DEFAULT_ANCHORS.iter())
            .map(|(&grid, anchors)| ScaleConfig {
                grid_height: grid,
                grid_width: grid,
                stride: DEFAULT_BLOCK_STRIDE,
                boxes_per_cell: DEFAULT_BOXES_PER_CELL,
                num_classes,
                anchors: anchors.to_vec(),
            })
            .collect();
        Self {
            scales,
            active: DEFAULT_ACTIVE_SCALES,
        }
    }

    pub fn active_scales(&self) -> &[ScaleConfig] {
        &self.scales[..self.active.min(self.scales.len())]
    }

    pub fn num_classes(&self) -> usize {
        self.scales.first().map(|s| s.num_classes).unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(anyhow!("scale pyramid defines no scales"));
        }
        if self.active == 0 || self.active > self.scales.len() {
            return Err(anyhow!(
                "active scale count {} must be between 1 and {}",
                self.active,
                self.scales.len()
            ));
        }
        let num_classes = self.num_classes();
        for (level, scale) in self.scales.iter().enumerate() {
            scale.validate(level)?;
            if scale.num_classes != num_classes {
                return Err(anyhow!(
                    "scale {} has {} classes, scale 0 has {}",
                    level,
                    scale.num_classes,
                    num_classes
                ));
            }
        }
        Ok(())
    }
}
