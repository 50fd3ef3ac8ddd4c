//! Helpers for building raw feature maps by hand.
//!
//! Used by the stub and synthetic inference backends and by tests to produce
//! tensors with known content.

use anyhow::{anyhow, Result};
use ndarray::{ArrayD, IxDyn};

use crate::detect::scale::{ScaleConfig, ScalePyramid, BOX_FIELDS};

/// Zeroed `[1, channels, grid_height, grid_width]` tensors for every defined
/// scale, in pyramid order.
pub fn zero_outputs(pyramid: &ScalePyramid) -> Vec<ArrayD<f32>> {
    pyramid
        .scales
        .iter()
        .map(|scale| {
            let [c, h, w] = scale.shape();
            ArrayD::zeros(IxDyn(&[1, c, h, w]))
        })
        .collect()
}

/// Raw logits to write into one box slot of one grid cell.
#[derive(Clone, Debug, PartialEq)]
pub struct PlantedBox {
    pub cell_x: usize,
    pub cell_y: usize,
    pub slot: usize,
    pub class_index: usize,
    /// `tx, ty, tw, th`.
    pub offsets: [f32; 4],
    /// Objectness logit `tc`.
    pub objectness: f32,
    pub class_logit: f32,
}

impl PlantedBox {
    /// A centred, anchor-sized box with near-certain objectness and class.
    pub fn strong(cell_x: usize, cell_y: usize, slot: usize, class_index: usize) -> Self {
        Self {
            cell_x,
            cell_y,
            slot,
            class_index,
            offsets: [0.0; 4],
            objectness: 8.0,
            class_logit: 12.0,
        }
    }
}

/// Write `planted` into `output`, which must be shaped for `scale` with any
/// number of leading unit axes.
pub fn plant(output: &mut ArrayD<f32>, scale: &ScaleConfig, planted: &PlantedBox) -> Result<()> {
    let shape = output.shape().to_vec();
    if shape.len() < 3 || shape[shape.len() - 3..] != scale.shape() {
        return Err(anyhow!(
            "tensor shape {:?} does not end with {:?}",
            shape,
            scale.shape()
        ));
    }
    if planted.cell_x >= scale.grid_width
        || planted.cell_y >= scale.grid_height
        || planted.slot >= scale.boxes_per_cell
        || planted.class_index >= scale.num_classes
    {
        return Err(anyhow!("planted box {:?} is outside the scale", planted));
    }

    let lead = shape.len() - 3;
    let base = planted.slot * (scale.num_classes + BOX_FIELDS);
    let mut set = |channel: usize, value: f32| {
        let mut index = vec![0; lead];
        index.extend_from_slice(&[channel, planted.cell_y, planted.cell_x]);
        output[IxDyn(&index)] = value;
    };

    for (i, &value) in planted.offsets.iter().enumerate() {
        set(base + i, value);
    }
    set(base + 4, planted.objectness);
    set(base + BOX_FIELDS + planted.class_index, planted.class_logit);
    Ok(())
}
