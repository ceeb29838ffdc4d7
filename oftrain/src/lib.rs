//! # Optical Flow Training Components
//!
//! This library provides the numeric pieces needed to train and evaluate neural optical flow
//! networks: dense flow fields and masks, multi-level and sequence losses, smoothness
//! regularisers, and post-processing that maps predictions back to original image coordinates.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use oftrain::prelude::v1::*;
//! ```
//!
//! You may need [`nalgebra`](https://crates.io/crates/nalgebra) to construct flow vectors.

pub mod config;
pub mod decoder;
pub mod flow_field;
pub mod loss;
pub mod mask;
pub mod pyramid;
pub mod resize;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            config::{build_flow_loss, build_occ_loss, DecoderConfig, LossConfig},
            decoder::{
                postprocess_result, predict_by_feat, revert_flow, FlowDataSample, FlowDecoder,
                LossMap, SampleMeta,
            },
            flow_field::FlowField,
            loss::{
                charbonnier_loss, epe_loss, sequence_loss, smooth_1st_loss, smooth_2nd_loss,
                FlowLoss, MultiLevelBce, MultiLevelCharbonnierLoss, MultiLevelEpe, PixelLoss,
                Reduction, SequenceLoss,
            },
            mask::Mask,
            pyramid::{FlowPyramid, PyramidDecoder, PyramidFeatures},
        };
        pub use anyhow::{anyhow, bail, ensure, Context, Error, Result};
    }
}
