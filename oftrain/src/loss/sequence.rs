//! # Sequence loss for iterative refinement networks

use super::{effective_valid, masked_reduce, FlowLoss, PixelLoss, Reduction};
use crate::prelude::v1::*;

/// Default magnitude above which ground truth vectors are ignored.
pub const SEQUENCE_MAX_FLOW: f32 = 400.0;

/// Weighted sum of losses over a sequence of refinement iterations.
///
/// Iteration `i` of `N` is weighted by `gamma ^ (N - 1 - i)`, so the final prediction has weight
/// 1 and earlier ones decay geometrically. All predictions must be at ground truth resolution.
///
/// # Arguments
///
/// * `preds` - predictions, in iteration order.
/// * `gt` - ground truth flow.
/// * `valid` - optional validity mask.
/// * `gamma` - decay factor in `(0, 1]`.
/// * `max_flow` - ground truth vectors at or above this magnitude are ignored.
/// * `pixel` - per-pixel penalty.
pub fn sequence_loss(
    preds: &[FlowField],
    gt: &FlowField,
    valid: Option<&Mask>,
    gamma: f32,
    max_flow: f32,
    pixel: PixelLoss,
) -> Result<f32> {
    ensure!(!preds.is_empty(), "sequence loss needs at least one prediction");
    ensure!(
        gamma > 0.0 && gamma <= 1.0,
        "gamma must be in (0, 1], got {gamma}"
    );

    let valid = effective_valid(gt, valid, max_flow)?;
    let n = preds.len();

    preds
        .iter()
        .enumerate()
        .try_fold(0.0, |acc, (i, pred)| -> Result<f32> {
            ensure!(
                pred.dim() == gt.dim(),
                "iteration {i}: prediction {:?} does not match ground truth {:?}",
                pred.dim(),
                gt.dim()
            );
            let weight = gamma.powi((n - 1 - i) as i32);
            let loss = masked_reduce(&pixel.map(pred, gt)?, &valid, Reduction::Mean)?;
            Ok(acc + weight * loss)
        })
}

/// Configured [`sequence_loss`].
///
/// Defaults to `gamma = 0.8`, `max_flow = 400` and an end-point error penalty.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SequenceLoss {
    pub gamma: f32,
    pub max_flow: f32,
    pub pixel: PixelLoss,
}

impl Default for SequenceLoss {
    fn default() -> Self {
        Self {
            gamma: 0.8,
            max_flow: SEQUENCE_MAX_FLOW,
            pixel: PixelLoss::default(),
        }
    }
}

impl SequenceLoss {
    /// Create a sequence loss with decay `gamma`.
    pub fn new(gamma: f32) -> Self {
        Self {
            gamma,
            ..Default::default()
        }
    }

    /// Select the per-pixel penalty.
    pub fn with_pixel_loss(mut self, pixel: PixelLoss) -> Self {
        self.pixel = pixel;
        self
    }

    /// Ignore ground truth vectors at or above `max_flow`.
    pub fn with_max_flow(mut self, max_flow: f32) -> Self {
        self.max_flow = max_flow;
        self
    }
}

impl FlowLoss for SequenceLoss {
    fn compute(&self, preds: &[FlowField], gt: &FlowField, valid: Option<&Mask>) -> Result<f32> {
        sequence_loss(preds, gt, valid, self.gamma, self.max_flow, self.pixel)
    }

    fn name(&self) -> &str {
        "SequenceLoss"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::epe_loss;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector2;

    fn iterations(n: usize) -> Vec<FlowField> {
        (0..n)
            .map(|i| FlowField::from_fn(6, 4, |x, _| Vector2::new(i as f32 + x as f32, 1.0)))
            .collect()
    }

    #[test]
    fn gamma_one_is_plain_sum() {
        let preds = iterations(4);
        let gt = FlowField::new(6, 4);

        let seq = sequence_loss(&preds, &gt, None, 1.0, f32::INFINITY, PixelLoss::Epe).unwrap();
        let sum: f32 = preds.iter().map(|p| epe_loss(p, &gt, None).unwrap()).sum();

        assert_approx_eq!(seq, sum, 1e-4);
    }

    #[test]
    fn last_iteration_has_unit_weight() {
        let gt = FlowField::new(2, 2);
        let preds = vec![
            FlowField::from_fn(2, 2, |_, _| Vector2::new(1.0, 0.0)),
            FlowField::from_fn(2, 2, |_, _| Vector2::new(1.0, 0.0)),
            FlowField::from_fn(2, 2, |_, _| Vector2::new(1.0, 0.0)),
        ];
        let seq = sequence_loss(&preds, &gt, None, 0.5, f32::INFINITY, PixelLoss::Epe).unwrap();
        assert_approx_eq!(seq, 0.25 + 0.5 + 1.0);
    }

    #[test]
    fn default_penalty_is_epe() {
        let gt = FlowField::new(2, 2);
        let preds = vec![FlowField::from_fn(2, 2, |_, _| Vector2::new(3.0, 4.0))];
        let loss = SequenceLoss::new(1.0);
        assert_eq!(loss.pixel, PixelLoss::Epe);
        assert_approx_eq!(loss.compute(&preds, &gt, None).unwrap(), 5.0);
    }

    #[test]
    fn invalid_gamma() {
        let preds = iterations(2);
        let gt = FlowField::new(6, 4);
        for gamma in [0.0, -0.5, 1.5] {
            assert!(sequence_loss(&preds, &gt, None, gamma, 400.0, PixelLoss::L1).is_err());
        }
    }

    #[test]
    fn empty_sequence() {
        let gt = FlowField::new(6, 4);
        assert!(SequenceLoss::default().compute(&[], &gt, None).is_err());
    }

    #[test]
    fn resolution_mismatch() {
        let gt = FlowField::new(6, 4);
        let preds = vec![FlowField::new(3, 2)];
        assert!(SequenceLoss::default().compute(&preds, &gt, None).is_err());
    }

    #[test]
    fn large_ground_truth_is_ignored() {
        let gt = FlowField::from_fn(2, 1, |x, _| Vector2::new(x as f32 * 1000.0, 0.0));
        let preds = vec![FlowField::new(2, 1)];
        let loss = SequenceLoss::new(0.8).with_pixel_loss(PixelLoss::Epe);
        assert_eq!(loss.compute(&preds, &gt, None).unwrap(), 0.0);
    }
}
