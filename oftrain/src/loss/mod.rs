//! # Loss functions for optical flow training
//!
//! All losses are evaluated against a single full resolution ground truth. Multi-level losses
//! take one prediction per pyramid level, upsample every level to the ground truth resolution,
//! undo the training-time flow normalisation and sum weighted per-level losses.

use crate::prelude::v1::*;

pub mod bce;
pub mod charbonnier;
pub mod epe;
pub mod sequence;
pub mod smooth;

mod multi_level;

pub use bce::{bce_loss, binary_cross_entropy, MultiLevelBce};
pub use charbonnier::{charbonnier, charbonnier_loss, MultiLevelCharbonnierLoss};
pub use epe::{endpoint_error, epe_loss, MultiLevelEpe};
pub use multi_level::LevelConfig;
pub use sequence::{sequence_loss, SequenceLoss};
pub use smooth::{smooth_1st_loss, smooth_2nd_loss};

/// Default epsilon of the Charbonnier penalty.
pub const CHARBONNIER_EPS: f32 = 1e-6;

/// Default probability clipping epsilon of binary cross entropy.
pub const BCE_EPS: f32 = 1e-7;

/// Loss over a set of flow predictions and a single ground truth.
pub trait FlowLoss {
    /// Compute the scalar loss.
    ///
    /// # Arguments
    ///
    /// * `preds` - predictions, one per level or iteration.
    /// * `gt` - full resolution ground truth flow.
    /// * `valid` - optional validity mask. `None` means every pixel is valid.
    fn compute(&self, preds: &[FlowField], gt: &FlowField, valid: Option<&Mask>) -> Result<f32>;

    /// Name of the loss, as used in configuration files.
    fn name(&self) -> &str;
}

/// Reduction of a per-pixel loss map into a scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Reduction {
    /// Average over valid pixels.
    #[default]
    Mean,
    /// Sum over valid pixels.
    Sum,
}

/// Per-pixel penalty used by iterative (sequence) losses.
///
/// Defaults to [`PixelLoss::Epe`].
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "lowercase"))]
pub enum PixelLoss {
    /// End-point error.
    #[default]
    Epe,
    /// Mean absolute error over the two flow channels.
    L1,
    /// Charbonnier penalty with the given epsilon.
    Charbonnier { eps: f32 },
}

impl PixelLoss {
    /// Compute the per-pixel loss map.
    pub fn map(&self, pred: &FlowField, gt: &FlowField) -> Result<Mask> {
        match *self {
            Self::Epe => endpoint_error(pred, gt, 2.0, None),
            Self::L1 => {
                let d = pred.diff(gt)?;
                let (w, h) = d.dim();
                Ok(Mask::from_fn(w, h, |x, y| {
                    let m = d.get_motion(x, y);
                    (m.x.abs() + m.y.abs()) * 0.5
                }))
            }
            Self::Charbonnier { eps } => charbonnier(pred, gt, eps, 0.5),
        }
    }
}

/// Reduce a loss map over valid pixels.
///
/// With [`Reduction::Mean`], a validity mask without any valid pixels yields `0.0` rather than
/// dividing by zero.
pub fn masked_reduce(map: &Mask, valid: &Mask, reduction: Reduction) -> Result<f32> {
    let masked = map.component_mul(valid)?;

    match reduction {
        Reduction::Sum => Ok(masked.sum()),
        Reduction::Mean => {
            let count = valid.sum();
            if count <= 0.0 {
                Ok(0.0)
            } else {
                Ok(masked.sum() / count)
            }
        }
    }
}

/// Masked mean of a loss map. An all-zero mask gives `0.0`.
pub fn masked_mean(map: &Mask, valid: Option<&Mask>) -> Result<f32> {
    match valid {
        Some(valid) => masked_reduce(map, valid, Reduction::Mean),
        None => Ok(map.mean()),
    }
}

/// Build the effective validity mask for a ground truth flow.
///
/// Pixels are valid when the provided mask is at least `0.5` and the ground truth magnitude is
/// below `max_flow`. A missing mask marks every pixel as valid.
pub fn effective_valid(gt: &FlowField, valid: Option<&Mask>, max_flow: f32) -> Result<Mask> {
    let (w, h) = gt.dim();

    let valid = match valid {
        Some(valid) => {
            ensure!(
                valid.dim() == (w, h),
                "validity mask shape {:?} does not match ground truth {:?}",
                valid.dim(),
                (w, h)
            );
            valid.threshold(0.5)
        }
        None => Mask::ones(w, h),
    };

    if max_flow.is_finite() {
        let below = gt.magnitude().map(|m| if m < max_flow { 1.0 } else { 0.0 });
        valid.component_mul(&below)
    } else {
        Ok(valid)
    }
}
