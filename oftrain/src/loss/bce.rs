//! # Binary cross entropy for occlusion estimation

use super::{masked_mean, LevelConfig, Reduction, BCE_EPS};
use crate::prelude::v1::*;

/// Per-pixel binary cross entropy between occlusion probabilities and labels.
///
/// Probabilities are clipped to `[eps, 1 - eps]` so that the logarithm stays finite.
pub fn binary_cross_entropy(pred: &Mask, gt: &Mask, eps: f32) -> Result<Mask> {
    ensure!(
        pred.dim() == gt.dim(),
        "occlusion shape mismatch: {:?} vs {:?}",
        pred.dim(),
        gt.dim()
    );
    ensure!(
        eps > 0.0 && eps < 0.5,
        "clipping epsilon must be in (0, 0.5), got {eps}"
    );

    let (w, h) = pred.dim();
    Ok(Mask::from_fn(w, h, |x, y| {
        let p = pred.get(x, y).clamp(eps, 1.0 - eps);
        let t = gt.get(x, y);
        -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
    }))
}

/// Mean binary cross entropy over valid pixels.
pub fn bce_loss(pred: &Mask, gt: &Mask, valid: Option<&Mask>, eps: f32) -> Result<f32> {
    masked_mean(&binary_cross_entropy(pred, gt, eps)?, valid)
}

/// Multi-level binary cross entropy over an occlusion pyramid.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct MultiLevelBce {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub levels: LevelConfig,
    #[cfg_attr(feature = "serde", serde(default = "default_eps"))]
    pub eps: f32,
}

fn default_eps() -> f32 {
    BCE_EPS
}

impl MultiLevelBce {
    /// Create a loss with one weight per level and the default clipping epsilon.
    pub fn new(weights: Vec<f32>) -> Self {
        Self {
            levels: LevelConfig::new(weights, 1.0),
            eps: default_eps(),
        }
    }

    /// Set the probability clipping epsilon.
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Set how per-pixel losses are reduced.
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.levels.reduction = reduction;
        self
    }

    /// Replace the per-level weights.
    pub fn set_weights(&mut self, weights: Vec<f32>) {
        self.levels.weights = weights;
    }

    /// Compute the weighted multi-level loss.
    ///
    /// # Arguments
    ///
    /// * `preds` - predicted occlusion probabilities, one per level.
    /// * `gt` - full resolution occlusion labels.
    /// * `valid` - optional validity mask.
    pub fn compute(&self, preds: &[Mask], gt: &Mask, valid: Option<&Mask>) -> Result<f32> {
        self.levels.map_loss(preds, gt, valid, |pred, gt| {
            binary_cross_entropy(pred, gt, self.eps)
        })
    }

    /// Name used in configuration files.
    pub fn name(&self) -> &str {
        "MultiLevelBCE"
    }
}
