//! # Flow decoders and prediction post-processing

use crate::prelude::v1::*;
use crate::resize::resize_flow;
use std::collections::BTreeMap;

/// Named scalar losses, as returned by [`FlowDecoder::loss`].
pub type LossMap = BTreeMap<String, f32>;

/// Per-sample augmentation metadata.
///
/// Shapes are stored as `(height, width)`.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct SampleMeta {
    /// Shape of the input image before any augmentation.
    pub ori_shape: (usize, usize),
    /// Shape of the input image after augmentation, as fed to the network.
    pub img_shape: (usize, usize),
    /// Padding applied along height and width, as `(before, after)` pairs.
    #[cfg_attr(feature = "serde", serde(default))]
    pub pad: Option<[(usize, usize); 2]>,
    /// Resize factors `(w_scale, h_scale)` applied to the input.
    #[cfg_attr(feature = "serde", serde(default))]
    pub scale_factor: Option<(f32, f32)>,
}

/// Per-sample record flowing through a decoder.
#[derive(Clone, Debug, Default)]
pub struct FlowDataSample {
    pub metainfo: Option<SampleMeta>,
    pub gt_flow_fw: Option<FlowField>,
    pub gt_valid: Option<Mask>,
    pub gt_occ_fw: Option<Mask>,
    pub pred_flow_fw: Option<FlowField>,
}

impl FlowDataSample {
    /// Create a sample that only carries metadata.
    pub fn with_meta(meta: SampleMeta) -> Self {
        Self {
            metainfo: Some(meta),
            ..Default::default()
        }
    }

    /// Create a sample that only carries a prediction.
    pub fn from_prediction(flow: FlowField) -> Self {
        Self {
            pred_flow_fw: Some(flow),
            ..Default::default()
        }
    }
}

/// Map a predicted flow back to the original input coordinates of a sample.
///
/// Padding takes precedence over resize factors when both are recorded.
pub fn revert_flow(flow: FlowField, meta: &SampleMeta) -> Result<FlowField> {
    let (ori_h, ori_w) = meta.ori_shape;
    let (w, h) = flow.dim();

    if let Some([(top, bottom), (left, right)]) = meta.pad {
        ensure!(
            top + bottom <= h && left + right <= w,
            "padding {:?} exceeds flow size {}x{}",
            meta.pad,
            w,
            h
        );
        Ok(flow.crop(left, top, w - left - right, h - top - bottom))
    } else if let Some((w_scale, h_scale)) = meta.scale_factor {
        ensure!(
            w_scale > 0.0 && h_scale > 0.0,
            "invalid scale factor ({w_scale}, {h_scale})"
        );
        let mut flow = resize_flow(&flow, ori_w, ori_h)?;
        flow.scale_channels(1.0 / w_scale, 1.0 / h_scale);
        Ok(flow)
    } else {
        Ok(flow)
    }
}

/// Revert a batch of predicted flows to original sample coordinates.
///
/// Without `samples`, each flow is wrapped in a prediction-only record. Otherwise, every sample
/// receives its reverted flow in `pred_flow_fw`.
pub fn postprocess_result(
    flows: Vec<FlowField>,
    samples: Option<Vec<FlowDataSample>>,
) -> Result<Vec<FlowDataSample>> {
    let mut samples = match samples {
        None => {
            return Ok(flows
                .into_iter()
                .map(FlowDataSample::from_prediction)
                .collect())
        }
        Some(samples) => samples,
    };

    ensure!(
        flows.len() == samples.len(),
        "got {} flows for {} samples",
        flows.len(),
        samples.len()
    );

    for (i, (flow, sample)) in flows.into_iter().zip(&mut samples).enumerate() {
        let flow = match &sample.metainfo {
            Some(meta) => revert_flow(flow, meta).with_context(|| format!("sample {i}"))?,
            None => flow,
        };
        log::trace!("sample {i}: reverted flow to {:?}", flow.dim());
        sample.pred_flow_fw = Some(flow);
    }

    Ok(samples)
}

/// Turn raw network output into per-sample predictions.
///
/// Without `samples` the output is only multiplied by `flow_div`. Otherwise, the whole batch is
/// first resized to the augmented image shape of the first sample, multiplied by `flow_div`, and
/// then reverted per sample with [`postprocess_result`].
pub fn predict_by_feat(
    flows: Vec<FlowField>,
    samples: Option<Vec<FlowDataSample>>,
    flow_div: f32,
) -> Result<Vec<FlowDataSample>> {
    let samples = match samples {
        None => {
            let flows = flows.into_iter().map(|f| f.scaled(flow_div)).collect();
            return postprocess_result(flows, None);
        }
        Some(samples) => samples,
    };

    let (h, w) = samples
        .first()
        .and_then(|s| s.metainfo.as_ref())
        .map(|m| m.img_shape)
        .ok_or_else(|| anyhow!("first sample carries no image shape"))?;

    let flows = flows
        .iter()
        .map(|f| Ok(resize_flow(f, w, h)?.scaled(flow_div)))
        .collect::<Result<Vec<_>>>()?;

    postprocess_result(flows, Some(samples))
}

/// Optical flow decoder head.
///
/// A decoder turns backbone features into flow predictions. It computes training losses and
/// produces final predictions in input image coordinates.
pub trait FlowDecoder {
    /// Input features of a batch.
    type Features;
    /// Raw decoder output for a batch.
    type Output;

    /// Compute raw decoder output.
    fn forward(&self, feat: &Self::Features) -> Result<Self::Output>;

    /// Compute losses from raw output and annotated samples.
    fn loss_by_feat(&self, out: &Self::Output, samples: &[FlowDataSample]) -> Result<LossMap>;

    /// Produce final predictions from raw output.
    fn predict_from_output(
        &self,
        out: Self::Output,
        samples: Option<Vec<FlowDataSample>>,
    ) -> Result<Vec<FlowDataSample>>;

    /// Multiplier that converts network output to pixel displacements.
    fn flow_div(&self) -> f32;

    /// Forward pass followed by loss computation.
    fn loss(&self, feat: &Self::Features, samples: &[FlowDataSample]) -> Result<LossMap> {
        let out = self.forward(feat)?;
        self.loss_by_feat(&out, samples)
    }

    /// Forward pass followed by prediction post-processing.
    fn predict(
        &self,
        feat: &Self::Features,
        samples: Option<Vec<FlowDataSample>>,
    ) -> Result<Vec<FlowDataSample>> {
        let out = self.forward(feat)?;
        self.predict_from_output(out, samples)
    }

    /// See [`predict_by_feat`].
    fn predict_by_feat(
        &self,
        flows: Vec<FlowField>,
        samples: Option<Vec<FlowDataSample>>,
    ) -> Result<Vec<FlowDataSample>> {
        predict_by_feat(flows, samples, self.flow_div())
    }
}
