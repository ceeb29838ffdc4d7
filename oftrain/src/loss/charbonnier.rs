//! # Charbonnier penalty

use super::{masked_mean, FlowLoss, LevelConfig, Reduction, CHARBONNIER_EPS};
use crate::prelude::v1::*;

/// Per-pixel generalised Charbonnier penalty `(|pred - gt|^2 + eps^2) ^ q`.
///
/// With `q = 0.5` this is the classic `sqrt(|d|^2 + eps^2)`, which behaves like L1 for large
/// errors and stays differentiable at zero.
pub fn charbonnier(pred: &FlowField, gt: &FlowField, eps: f32, q: f32) -> Result<Mask> {
    let d = pred.diff(gt)?;
    let (w, h) = d.dim();
    let eps2 = eps * eps;

    Ok(Mask::from_fn(w, h, |x, y| {
        let sq = d.get_motion(x, y).norm_squared() + eps2;
        if q == 0.5 {
            sq.sqrt()
        } else {
            sq.powf(q)
        }
    }))
}

/// Mean Charbonnier penalty over valid pixels.
pub fn charbonnier_loss(
    pred: &FlowField,
    gt: &FlowField,
    valid: Option<&Mask>,
    eps: f32,
) -> Result<f32> {
    masked_mean(&charbonnier(pred, gt, eps, 0.5)?, valid)
}

/// Multi-level Charbonnier loss.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct MultiLevelCharbonnierLoss {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub levels: LevelConfig,
    #[cfg_attr(feature = "serde", serde(default = "default_eps"))]
    pub eps: f32,
    #[cfg_attr(feature = "serde", serde(default = "default_q"))]
    pub q: f32,
}

fn default_eps() -> f32 {
    CHARBONNIER_EPS
}

fn default_q() -> f32 {
    0.5
}

impl MultiLevelCharbonnierLoss {
    /// Create a loss with per-level weights and the divisor that brings predictions to pixels.
    pub fn new(weights: Vec<f32>, flow_div: f32) -> Self {
        Self {
            levels: LevelConfig::new(weights, flow_div),
            eps: default_eps(),
            q: default_q(),
        }
    }

    /// Set the Charbonnier epsilon.
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Set the exponent of the generalised penalty.
    pub fn with_q(mut self, q: f32) -> Self {
        self.q = q;
        self
    }

    /// Ignore ground truth vectors at or above `max_flow`.
    pub fn with_max_flow(mut self, max_flow: f32) -> Self {
        self.levels.max_flow = max_flow;
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
}

impl FlowLoss for MultiLevelCharbonnierLoss {
    fn compute(&self, preds: &[FlowField], gt: &FlowField, valid: Option<&Mask>) -> Result<f32> {
        self.levels.flow_loss(preds, gt, valid, |pred, gt| {
            charbonnier(pred, gt, self.eps, self.q)
        })
    }

    fn name(&self) -> &str {
        "MultiLevelCharbonnierLoss"
    }
}
