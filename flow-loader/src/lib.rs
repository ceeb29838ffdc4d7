//! Ground truth annotation loader.
//!
//! Reads optical flow and occlusion annotations referenced by a dataset record and decodes them
//! into dense fields. The flow format is chosen by the last 3 characters of each path:
//! `flo` for Middlebury files and `pfm` for Portable Float Maps. Sparse (KITTI style) flow is
//! always a 16-bit PNG.

use oftrain::prelude::v1::*;
use std::fmt;

pub mod codec;
pub mod file_client;

pub use codec::{
    flow_from_bytes, occ_from_bytes, read_flo, read_pfm, sparse_flow_from_bytes, write_flo,
    write_sparse_flow,
};
pub use file_client::{DiskBackend, FileClient, MemoryBackend};

/// File references of a single dataset record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnnotationPaths {
    pub flow_fw_path: Option<String>,
    pub flow_bw_path: Option<String>,
    pub occ_fw_path: Option<String>,
    pub occ_bw_path: Option<String>,
}

/// Decoded annotations of a single dataset record.
#[derive(Clone, Debug, Default)]
pub struct Annotations {
    pub gt_flow_fw: Option<FlowField>,
    pub gt_flow_bw: Option<FlowField>,
    /// Only set for sparse flow.
    pub gt_valid: Option<Mask>,
    /// Only set when occlusion loading is enabled.
    pub gt_occ_fw: Option<Mask>,
    pub gt_occ_bw: Option<Mask>,
}

impl Annotations {
    /// Convert into a decoder sample carrying the forward annotations.
    pub fn into_sample(self, meta: Option<SampleMeta>) -> FlowDataSample {
        FlowDataSample {
            metainfo: meta,
            gt_flow_fw: self.gt_flow_fw,
            gt_valid: self.gt_valid,
            gt_occ_fw: self.gt_occ_fw,
            pred_flow_fw: None,
        }
    }
}

/// Last 3 characters of a path, used to select the flow decoder.
///
/// Paths shorter than 3 characters are returned whole.
pub fn suffix(path: &str) -> &str {
    path.char_indices()
        .rev()
        .nth(2)
        .map(|(i, _)| &path[i..])
        .unwrap_or(path)
}

/// Annotation loading transform.
///
/// Every decode failure is returned as an error. Missing paths produce `None`.
pub struct LoadAnnotations {
    with_occ: bool,
    sparse: bool,
    client: Box<dyn FileClient>,
}

impl LoadAnnotations {
    /// Create a new loader.
    ///
    /// # Arguments
    ///
    /// * `with_occ` - also load occlusion maps.
    /// * `sparse` - forward flow is sparse (KITTI style) and comes with a validity mask.
    /// * `client` - backend providing file bytes.
    pub fn new(with_occ: bool, sparse: bool, client: Box<dyn FileClient>) -> Self {
        Self {
            with_occ,
            sparse,
            client,
        }
    }

    /// Load annotations of a single record.
    pub fn transform(&self, paths: &AnnotationPaths) -> Result<Annotations> {
        let mut out = if self.sparse {
            self.load_sparse_flow(paths)?
        } else {
            self.load_flow(paths)?
        };

        if self.with_occ {
            out.gt_occ_fw = self.load_occ(paths.occ_fw_path.as_deref())?;
            out.gt_occ_bw = self.load_occ(paths.occ_bw_path.as_deref())?;
        }

        Ok(out)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        log::trace!("reading {path} from {}", self.client.name());
        self.client.get(path)
    }

    fn load_dense(&self, path: Option<&str>) -> Result<Option<FlowField>> {
        path.map(|path| -> Result<FlowField> {
            let flow = flow_from_bytes(&self.read(path)?, suffix(path))
                .with_context(|| format!("failed to decode flow {path}"))?;
            log::debug!("loaded flow {path} {:?}", flow.dim());
            Ok(flow)
        })
        .transpose()
    }

    fn load_flow(&self, paths: &AnnotationPaths) -> Result<Annotations> {
        Ok(Annotations {
            gt_flow_fw: self.load_dense(paths.flow_fw_path.as_deref())?,
            gt_flow_bw: self.load_dense(paths.flow_bw_path.as_deref())?,
            ..Default::default()
        })
    }

    fn load_sparse_flow(&self, paths: &AnnotationPaths) -> Result<Annotations> {
        // Sparse datasets carry no backward flow.
        let (gt_flow_fw, gt_valid) = match paths.flow_fw_path.as_deref() {
            Some(path) => {
                let (flow, valid) = sparse_flow_from_bytes(&self.read(path)?)
                    .with_context(|| format!("failed to decode sparse flow {path}"))?;
                log::debug!(
                    "loaded sparse flow {path} {:?}, {} valid",
                    flow.dim(),
                    valid.count_nonzero()
                );
                (Some(flow), Some(valid))
            }
            None => (None, None),
        };

        Ok(Annotations {
            gt_flow_fw,
            gt_valid,
            ..Default::default()
        })
    }

    fn load_occ(&self, path: Option<&str>) -> Result<Option<Mask>> {
        path.map(|path| -> Result<Mask> {
            occ_from_bytes(&self.read(path)?)
                .with_context(|| format!("failed to decode occlusion {path}"))
        })
        .transpose()
    }
}

impl fmt::Display for LoadAnnotations {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "LoadAnnotations(with_occ={}, sparse={}, file_client={})",
            self.with_occ,
            self.sparse,
            self.client.name()
        )
    }
}
