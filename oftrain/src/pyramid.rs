//! # Coarse-to-fine residual pyramid decoder
//!
//! The decoder receives per-level residual flow estimates (in normalised units, i.e. already
//! divided by the flow divisor) and accumulates them coarse-to-fine: every level adds its
//! residual to the upsampled estimate of the previous level.

use crate::config::{build_flow_loss, build_occ_loss, DecoderConfig};
use crate::decoder::{FlowDataSample, FlowDecoder, LossMap};
use crate::loss::{FlowLoss, MultiLevelBce};
use crate::prelude::v1::*;
use crate::resize::{resize_flow, resize_mask};

/// Per-sample decoder features.
#[derive(Clone, Debug, Default)]
pub struct PyramidFeatures {
    /// Residual flow per level, coarsest first.
    pub residuals: Vec<FlowField>,
    /// Occlusion probabilities per level, coarsest first.
    pub occ: Option<Vec<Mask>>,
}

/// Accumulated per-sample flow pyramid.
#[derive(Clone, Debug, Default)]
pub struct FlowPyramid {
    /// Flow per level, coarsest first.
    pub flows: Vec<FlowField>,
    pub occ: Option<Vec<Mask>>,
}

impl FlowPyramid {
    /// Finest flow estimate.
    pub fn finest(&self) -> Option<&FlowField> {
        self.flows.last()
    }
}

/// Residual pyramid decoder with configurable losses.
pub struct PyramidDecoder {
    flow_div: f32,
    flow_loss: Box<dyn FlowLoss>,
    occ_loss: Option<MultiLevelBce>,
}

impl PyramidDecoder {
    /// Create a decoder from already built losses.
    pub fn new(flow_div: f32, flow_loss: Box<dyn FlowLoss>, occ_loss: Option<MultiLevelBce>) -> Self {
        Self {
            flow_div,
            flow_loss,
            occ_loss,
        }
    }

    /// Build a decoder and its losses from configuration.
    pub fn from_config(cfg: &DecoderConfig) -> Result<Self> {
        ensure!(cfg.flow_div > 0.0, "flow_div must be positive");

        let flow_loss = build_flow_loss(&cfg.flow_loss)?;
        let occ_loss = cfg.occ_loss.as_ref().map(build_occ_loss).transpose()?;

        Ok(Self::new(cfg.flow_div, flow_loss, occ_loss))
    }

    fn accumulate(feat: &PyramidFeatures) -> Result<FlowPyramid> {
        ensure!(!feat.residuals.is_empty(), "empty flow pyramid");

        let mut flows: Vec<FlowField> = Vec::with_capacity(feat.residuals.len());

        for residual in &feat.residuals {
            let (w, h) = residual.dim();
            let flow = match flows.last() {
                Some(prev) => {
                    let (pw, ph) = prev.dim();
                    ensure!(
                        pw <= w && ph <= h,
                        "pyramid levels must be ordered coarse to fine"
                    );
                    let up = resize_flow(prev, w, h)?;
                    FlowField::from_fn(w, h, |x, y| up.get_motion(x, y) + residual.get_motion(x, y))
                }
                None => residual.clone(),
            };
            flows.push(flow);
        }

        if let Some(occ) = &feat.occ {
            ensure!(
                occ.len() == flows.len(),
                "{} occlusion levels for {} flow levels",
                occ.len(),
                flows.len()
            );
        }

        Ok(FlowPyramid {
            flows,
            occ: feat.occ.clone(),
        })
    }
}

impl FlowDecoder for PyramidDecoder {
    type Features = Vec<PyramidFeatures>;
    type Output = Vec<FlowPyramid>;

    fn forward(&self, feat: &Self::Features) -> Result<Self::Output> {
        feat.iter()
            .enumerate()
            .map(|(i, f)| Self::accumulate(f).with_context(|| format!("sample {i}")))
            .collect()
    }

    fn loss_by_feat(&self, out: &Self::Output, samples: &[FlowDataSample]) -> Result<LossMap> {
        ensure!(
            out.len() == samples.len() && !samples.is_empty(),
            "got {} predictions for {} samples",
            out.len(),
            samples.len()
        );

        let mut flow_total = 0.0;
        let mut occ_total = 0.0;

        for (i, (pyramid, sample)) in out.iter().zip(samples).enumerate() {
            let gt = sample
                .gt_flow_fw
                .as_ref()
                .ok_or_else(|| anyhow!("sample {i} has no ground truth flow"))?;

            flow_total += self
                .flow_loss
                .compute(&pyramid.flows, gt, sample.gt_valid.as_ref())
                .with_context(|| format!("{} on sample {i}", self.flow_loss.name()))?;

            if let Some(occ_loss) = &self.occ_loss {
                let preds = pyramid
                    .occ
                    .as_ref()
                    .ok_or_else(|| anyhow!("sample {i} has no occlusion prediction"))?;
                let gt = sample
                    .gt_occ_fw
                    .as_ref()
                    .ok_or_else(|| anyhow!("sample {i} has no ground truth occlusion"))?;
                occ_total += occ_loss.compute(preds, gt, None)?;
            }
        }

        let n = samples.len() as f32;
        let mut losses = LossMap::new();
        losses.insert("loss_flow".into(), flow_total / n);
        if self.occ_loss.is_some() {
            losses.insert("loss_occ".into(), occ_total / n);
        }

        log::debug!("losses: {losses:?}");

        Ok(losses)
    }

    fn predict_from_output(
        &self,
        out: Self::Output,
        samples: Option<Vec<FlowDataSample>>,
    ) -> Result<Vec<FlowDataSample>> {
        let flows = out
            .into_iter()
            .map(|p| p.flows.into_iter().last())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| anyhow!("empty flow pyramid"))?;

        self.predict_by_feat(flows, samples)
    }

    fn flow_div(&self) -> f32 {
        self.flow_div
    }
}

/// Upsample the finest occlusion estimate of a pyramid to `width x height`.
pub fn finest_occlusion(
    pyramid: &FlowPyramid,
    width: usize,
    height: usize,
) -> Result<Option<Mask>> {
    pyramid
        .occ
        .as_ref()
        .and_then(|o| o.last())
        .map(|o| resize_mask(o, width, height))
        .transpose()
}
