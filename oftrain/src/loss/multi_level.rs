use super::{effective_valid, masked_reduce, Reduction};
use crate::prelude::v1::*;
use crate::resize::{resize_flow, resize_mask};

/// Shared configuration of multi-level losses.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LevelConfig {
    /// Per-level weights, one for each prediction.
    pub weights: Vec<f32>,
    /// Multiplier that brings network output back to pixel units.
    pub flow_div: f32,
    /// Ground truth vectors at or above this magnitude are ignored.
    pub max_flow: f32,
    pub reduction: Reduction,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            weights: vec![1.0],
            flow_div: 1.0,
            max_flow: f32::INFINITY,
            reduction: Reduction::Mean,
        }
    }
}

impl LevelConfig {
    /// Create a configuration with one weight per level.
    ///
    /// Predictions are multiplied by `flow_div` after upsampling.
    pub fn new(weights: Vec<f32>, flow_div: f32) -> Self {
        Self {
            weights,
            flow_div,
            ..Default::default()
        }
    }

    fn check_levels(&self, levels: usize) -> Result<()> {
        ensure!(levels > 0, "no prediction levels supplied");
        ensure!(
            self.weights.len() == levels,
            "got {} predictions but {} level weights",
            levels,
            self.weights.len()
        );
        Ok(())
    }

    /// Sum weighted per-level flow losses.
    ///
    /// Every level is upsampled to the resolution of `gt` and multiplied by `flow_div` before
    /// `pixel` computes its per-pixel loss map.
    pub(crate) fn flow_loss(
        &self,
        preds: &[FlowField],
        gt: &FlowField,
        valid: Option<&Mask>,
        pixel: impl Fn(&FlowField, &FlowField) -> Result<Mask>,
    ) -> Result<f32> {
        self.check_levels(preds.len())?;

        let (w, h) = gt.dim();
        let valid = effective_valid(gt, valid, self.max_flow)?;

        preds
            .iter()
            .zip(&self.weights)
            .enumerate()
            .try_fold(0.0, |acc, (level, (pred, weight))| -> Result<f32> {
                let pred = resize_flow(pred, w, h)
                    .with_context(|| format!("level {level}"))?
                    .scaled(self.flow_div);
                let map = pixel(&pred, gt)?;
                let loss = masked_reduce(&map, &valid, self.reduction)?;
                log::trace!("level {level}: loss {loss} weight {weight}");
                Ok(acc + weight * loss)
            })
    }

    /// Sum weighted per-level losses of single channel predictions.
    ///
    /// The flow divisor and `max_flow` do not apply to single channel maps.
    pub(crate) fn map_loss(
        &self,
        preds: &[Mask],
        gt: &Mask,
        valid: Option<&Mask>,
        pixel: impl Fn(&Mask, &Mask) -> Result<Mask>,
    ) -> Result<f32> {
        self.check_levels(preds.len())?;

        let (w, h) = gt.dim();
        let valid = match valid {
            Some(valid) => valid.threshold(0.5),
            None => Mask::ones(w, h),
        };

        preds
            .iter()
            .zip(&self.weights)
            .enumerate()
            .try_fold(0.0, |acc, (level, (pred, weight))| -> Result<f32> {
                let pred = resize_mask(pred, w, h).with_context(|| format!("level {level}"))?;
                let map = pixel(&pred, gt)?;
                let loss = masked_reduce(&map, &valid, self.reduction)?;
                log::trace!("level {level}: loss {loss} weight {weight}");
                Ok(acc + weight * loss)
            })
    }
}
