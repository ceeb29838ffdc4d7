//! # Loss and decoder configuration
//!
//! Losses are selected by name, matching the `type` key used in training configuration files:
//!
//! ```json
//! { "type": "MultiLevelEPE", "weights": [0.32, 0.08, 0.02, 0.01, 0.005], "flow_div": 20.0 }
//! ```

use crate::loss::*;
use crate::prelude::v1::*;

/// Recognised loss variants.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum LossConfig {
    #[cfg_attr(feature = "serde", serde(rename = "MultiLevelEPE"))]
    MultiLevelEpe(MultiLevelEpe),
    #[cfg_attr(feature = "serde", serde(rename = "MultiLevelCharbonnierLoss"))]
    MultiLevelCharbonnier(MultiLevelCharbonnierLoss),
    #[cfg_attr(feature = "serde", serde(rename = "MultiLevelBCE"))]
    MultiLevelBce(MultiLevelBce),
    #[cfg_attr(feature = "serde", serde(rename = "SequenceLoss"))]
    Sequence(SequenceLoss),
}

impl LossConfig {
    /// Configuration name of the loss, e.g. `MultiLevelEPE`.
    pub fn name(&self) -> &str {
        match self {
            Self::MultiLevelEpe(l) => l.name(),
            Self::MultiLevelCharbonnier(l) => l.name(),
            Self::MultiLevelBce(l) => l.name(),
            Self::Sequence(l) => l.name(),
        }
    }
}

/// Build a flow loss from its configuration.
///
/// Fails for losses that do not operate on flow, such as `MultiLevelBCE`.
pub fn build_flow_loss(cfg: &LossConfig) -> Result<Box<dyn FlowLoss>> {
    let loss: Box<dyn FlowLoss> = match cfg {
        LossConfig::MultiLevelEpe(l) => Box::new(l.clone()),
        LossConfig::MultiLevelCharbonnier(l) => Box::new(l.clone()),
        LossConfig::Sequence(l) => Box::new(l.clone()),
        LossConfig::MultiLevelBce(_) => bail!("{} is not a flow loss", cfg.name()),
    };
    log::debug!("built flow loss {}", loss.name());
    Ok(loss)
}

/// Build an occlusion loss from its configuration.
pub fn build_occ_loss(cfg: &LossConfig) -> Result<MultiLevelBce> {
    match cfg {
        LossConfig::MultiLevelBce(l) => Ok(l.clone()),
        _ => Err(anyhow!("{} is not an occlusion loss", cfg.name())),
    }
}

/// Configuration of a pyramid flow decoder.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct DecoderConfig {
    /// Multiplier that converts network output into pixel displacements.
    #[cfg_attr(feature = "serde", serde(default = "default_flow_div"))]
    pub flow_div: f32,
    pub flow_loss: LossConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub occ_loss: Option<LossConfig>,
}

fn default_flow_div() -> f32 {
    20.0
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            flow_div: default_flow_div(),
            flow_loss: LossConfig::MultiLevelEpe(MultiLevelEpe::new(
                vec![0.005, 0.01, 0.02, 0.08, 0.32],
                default_flow_div(),
            )),
            occ_loss: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_wrong_family() {
        let bce = LossConfig::MultiLevelBce(MultiLevelBce::new(vec![1.0]));
        assert!(build_flow_loss(&bce).is_err());
        assert!(build_occ_loss(&bce).is_ok());

        let seq = LossConfig::Sequence(SequenceLoss::default());
        assert_eq!(build_flow_loss(&seq).unwrap().name(), "SequenceLoss");
        assert!(build_occ_loss(&seq).is_err());
    }

    #[test]
    fn default_decoder_uses_epe() {
        let cfg = DecoderConfig::default();
        assert_eq!(cfg.flow_loss.name(), "MultiLevelEPE");
        assert_eq!(build_flow_loss(&cfg.flow_loss).unwrap().name(), "MultiLevelEPE");
    }
}
