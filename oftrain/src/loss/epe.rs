//! # End-point error

use super::{masked_mean, FlowLoss, LevelConfig, Reduction};
use crate::prelude::v1::*;

/// Per-pixel end-point error map.
///
/// Computes the `p`-norm of `pred - gt` over the two flow channels. With `robust` set to
/// `Some((q, eps))` the robust form `(norm + eps) ^ q` is returned instead.
///
/// # Arguments
///
/// * `pred` - predicted flow.
/// * `gt` - ground truth flow, of the same size as `pred`.
/// * `p` - order of the norm.
/// * `robust` - optional `(q, eps)` pair.
pub fn endpoint_error(
    pred: &FlowField,
    gt: &FlowField,
    p: f32,
    robust: Option<(f32, f32)>,
) -> Result<Mask> {
    ensure!(p > 0.0, "norm order must be positive, got {p}");

    let d = pred.diff(gt)?;
    let (w, h) = d.dim();

    Ok(Mask::from_fn(w, h, |x, y| {
        let m = d.get_motion(x, y);
        let norm = if p == 2.0 {
            m.norm()
        } else {
            (m.x.abs().powf(p) + m.y.abs().powf(p)).powf(1.0 / p)
        };
        match robust {
            Some((q, eps)) => (norm + eps).powf(q),
            None => norm,
        }
    }))
}

/// Mean end-point error over valid pixels.
///
/// ```
/// use oftrain::prelude::v1::*;
///
/// let flow = FlowField::from_fn(8, 8, |x, y| nalgebra::Vector2::new(x as f32, y as f32));
/// assert_eq!(epe_loss(&flow, &flow, None).unwrap(), 0.0);
/// ```
pub fn epe_loss(pred: &FlowField, gt: &FlowField, valid: Option<&Mask>) -> Result<f32> {
    masked_mean(&endpoint_error(pred, gt, 2.0, None)?, valid)
}

/// Multi-level end-point error loss.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct MultiLevelEpe {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub levels: LevelConfig,
    #[cfg_attr(feature = "serde", serde(default = "default_p"))]
    pub p: f32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub robust: Option<(f32, f32)>,
}

fn default_p() -> f32 {
    2.0
}

impl MultiLevelEpe {
    /// Create a new loss with per-level `weights` and flow divisor.
    pub fn new(weights: Vec<f32>, flow_div: f32) -> Self {
        Self {
            levels: LevelConfig::new(weights, flow_div),
            p: default_p(),
            robust: None,
        }
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

    /// Use the robust `(norm + eps) ^ q` penalty.
    pub fn with_robust(mut self, q: f32, eps: f32) -> Self {
        self.robust = Some((q, eps));
        self
    }

    /// Replace the level weights, for example after they were updated by a trainer.
    pub fn set_weights(&mut self, weights: Vec<f32>) {
        self.levels.weights = weights;
    }
}

impl FlowLoss for MultiLevelEpe {
    fn compute(&self, preds: &[FlowField], gt: &FlowField, valid: Option<&Mask>) -> Result<f32> {
        self.levels.flow_loss(preds, gt, valid, |pred, gt| {
            endpoint_error(pred, gt, self.p, self.robust)
        })
    }

    fn name(&self) -> &str {
        "MultiLevelEPE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resize::resize_flow;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector2;
    use rand::Rng;

    fn random_flow(w: usize, h: usize) -> FlowField {
        let mut rng = rand::thread_rng();
        FlowField::from_fn(w, h, |_, _| {
            Vector2::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0))
        })
    }

    #[test]
    fn self_epe_is_zero() {
        let f = random_flow(16, 12);
        assert_eq!(epe_loss(&f, &f, None).unwrap(), 0.0);
    }

    #[test]
    fn known_epe() {
        let pred = FlowField::from_fn(4, 4, |_, _| Vector2::new(3.0, 4.0));
        let gt = FlowField::new(4, 4);
        assert_approx_eq!(epe_loss(&pred, &gt, None).unwrap(), 5.0);
    }

    #[test]
    fn l1_norm_order() {
        let pred = FlowField::from_fn(2, 2, |_, _| Vector2::new(3.0, -4.0));
        let gt = FlowField::new(2, 2);
        let map = endpoint_error(&pred, &gt, 1.0, None).unwrap();
        assert_approx_eq!(map.mean(), 7.0);
    }

    #[test]
    fn robust_penalty() {
        let pred = FlowField::from_fn(2, 2, |_, _| Vector2::new(3.0, 4.0));
        let gt = FlowField::new(2, 2);
        let map = endpoint_error(&pred, &gt, 2.0, Some((0.5, 4.0))).unwrap();
        assert_approx_eq!(map.get(1, 1), 3.0);
    }

    #[test]
    fn masked_epe_with_empty_mask_is_zero() {
        let pred = random_flow(8, 8);
        let gt = random_flow(8, 8);
        let valid = Mask::new(8, 8);
        assert_eq!(epe_loss(&pred, &gt, Some(&valid)).unwrap(), 0.0);
    }

    #[test]
    fn masked_epe_ignores_invalid_pixels() {
        let pred = FlowField::from_fn(2, 1, |x, _| Vector2::new(x as f32 * 100.0, 0.0));
        let gt = FlowField::new(2, 1);
        let valid = Mask::from_row_major(2, 1, &[1.0, 0.0]).unwrap();
        assert_eq!(epe_loss(&pred, &gt, Some(&valid)).unwrap(), 0.0);
    }

    #[test]
    fn single_level_matches_base_loss() {
        let pred = random_flow(8, 6);
        let gt = random_flow(16, 12);
        let flow_div = 20.0;

        let loss = MultiLevelEpe::new(vec![1.0], flow_div);
        let multi = loss.compute(&[pred.clone()], &gt, None).unwrap();

        let up = resize_flow(&pred, 16, 12).unwrap().scaled(flow_div);
        let direct = epe_loss(&up, &gt, None).unwrap();

        assert_approx_eq!(multi, direct, 1e-3);
    }

    #[test]
    fn levels_are_weighted() {
        let gt = FlowField::new(8, 8);
        let coarse = FlowField::from_fn(2, 2, |_, _| Vector2::new(1.0, 0.0));
        let fine = FlowField::from_fn(8, 8, |_, _| Vector2::new(0.0, 2.0));

        let loss = MultiLevelEpe::new(vec![0.5, 0.25], 1.0);
        let value = loss.compute(&[coarse, fine], &gt, None).unwrap();
        assert_approx_eq!(value, 0.5 * 1.0 + 0.25 * 2.0);
    }

    #[test]
    fn weight_mismatch_is_error() {
        let gt = FlowField::new(8, 8);
        let loss = MultiLevelEpe::new(vec![1.0], 1.0);
        let preds = [FlowField::new(4, 4), FlowField::new(8, 8)];
        assert!(loss.compute(&preds, &gt, None).is_err());
    }

    #[test]
    fn empty_level_is_error() {
        let gt = FlowField::from_fn(4, 4, |_, _| Vector2::new(1.0, 0.0));
        let loss = MultiLevelEpe::new(vec![1.0], 1.0);
        assert!(loss.compute(&[FlowField::new(0, 0)], &gt, None).is_err());
    }

    #[test]
    fn sum_reduction() {
        let gt = FlowField::new(4, 4);
        let pred = FlowField::from_fn(4, 4, |_, _| Vector2::new(1.0, 0.0));
        let loss = MultiLevelEpe::new(vec![1.0], 1.0).with_reduction(Reduction::Sum);
        assert_approx_eq!(loss.compute(&[pred], &gt, None).unwrap(), 16.0);
    }
}
