//! Evaluate a predicted flow file against ground truth.

use clap::*;
use flow_loader::{suffix, AnnotationPaths, DiskBackend, FileClient, LoadAnnotations};
use oftrain::loss::CHARBONNIER_EPS;
use oftrain::prelude::v1::{Result, *};
use serde::Serialize;

/// Metrics of a single prediction.
#[derive(Debug, Serialize)]
struct Report {
    width: usize,
    height: usize,
    valid_pixels: usize,
    epe: f32,
    charbonnier: f32,
    smooth_1st: f32,
    smooth_2nd: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    configured_loss: Option<(String, f32)>,
}

struct EvalArgs<'a> {
    gt: &'a str,
    pred: &'a str,
    sparse: bool,
    meta: Option<SampleMeta>,
    config: Option<DecoderConfig>,
}

fn evaluate(client: Box<dyn FileClient>, args: &EvalArgs) -> Result<(Report, FlowField)> {
    let pred = flow_loader::flow_from_bytes(&client.get(args.pred)?, suffix(args.pred))
        .with_context(|| format!("failed to decode prediction {}", args.pred))?;

    let loader = LoadAnnotations::new(false, args.sparse, client);
    log::info!("{loader}");

    let ann = loader.transform(&AnnotationPaths {
        flow_fw_path: Some(args.gt.to_string()),
        ..Default::default()
    })?;
    let gt = ann
        .gt_flow_fw
        .ok_or_else(|| anyhow!("no ground truth flow loaded"))?;

    let flow_div = args.config.as_ref().map(|c| c.flow_div).unwrap_or(1.0);

    let pred = match &args.meta {
        Some(meta) => {
            let samples = vec![FlowDataSample::with_meta(meta.clone())];
            predict_by_feat(vec![pred], Some(samples), flow_div)?
                .pop()
                .and_then(|s| s.pred_flow_fw)
                .ok_or_else(|| anyhow!("post-processing produced no prediction"))?
        }
        None => pred.scaled(flow_div),
    };

    ensure!(
        pred.dim() == gt.dim(),
        "prediction {:?} does not match ground truth {:?}",
        pred.dim(),
        gt.dim()
    );

    let valid = ann.gt_valid.as_ref();
    let (width, height) = gt.dim();

    let configured_loss = match &args.config {
        Some(cfg) => {
            let loss = build_flow_loss(&cfg.flow_loss)?;
            // Multi-level losses expect network units, sequence loss expects pixels.
            let input = match cfg.flow_loss {
                LossConfig::Sequence(_) => pred.clone(),
                _ => pred.clone().scaled(1.0 / flow_div),
            };
            let value = loss.compute(&[input], &gt, valid)?;
            Some((loss.name().to_string(), value))
        }
        None => None,
    };

    let report = Report {
        width,
        height,
        valid_pixels: valid.map(Mask::count_nonzero).unwrap_or(width * height),
        epe: epe_loss(&pred, &gt, valid)?,
        charbonnier: charbonnier_loss(&pred, &gt, valid, CHARBONNIER_EPS)?,
        smooth_1st: smooth_1st_loss(&pred, None, 0.0)?,
        smooth_2nd: smooth_2nd_loss(&pred, None, 0.0)?,
        configured_loss,
    };

    Ok((report, pred))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let file = std::fs::File::open(path).with_context(|| format!("failed to open {path}"))?;
    serde_json::from_reader(file).with_context(|| format!("failed to parse {path}"))
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("flow-eval")
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("gt")
                .long("gt")
                .short('g')
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("pred")
                .long("pred")
                .short('p')
                .takes_value(true)
                .required(true),
        )
        .arg(Arg::new("sparse").long("sparse").short('s').required(false))
        .arg(Arg::new("meta").long("meta").short('m').takes_value(true))
        .arg(Arg::new("config").long("config").short('c').takes_value(true))
        .arg(Arg::new("output").long("output").short('o').takes_value(true))
        .get_matches();

    let meta = matches.value_of("meta").map(read_json).transpose()?;
    let config = matches.value_of("config").map(read_json).transpose()?;

    let args = EvalArgs {
        gt: matches.value_of("gt").unwrap(),
        pred: matches.value_of("pred").unwrap(),
        sparse: matches.is_present("sparse"),
        meta,
        config,
    };

    let (report, pred) = evaluate(Box::new(DiskBackend::new()), &args)?;

    if let Some(output) = matches.value_of("output") {
        std::fs::write(output, flow_loader::write_flo(&pred))?;
        log::info!("wrote reverted prediction to {output}");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_loader::{write_flo, MemoryBackend};

    fn constant(w: usize, h: usize, x: f32, y: f32) -> FlowField {
        FlowField::from_fn(w, h, |_, _| nalgebra::Vector2::new(x, y))
    }

    fn client(gt: &FlowField, pred: &FlowField) -> Box<dyn FileClient> {
        let mut client = MemoryBackend::new();
        client.insert("gt.flo", write_flo(gt));
        client.insert("pred.flo", write_flo(pred));
        Box::new(client)
    }

    fn args(meta: Option<SampleMeta>, config: Option<DecoderConfig>) -> EvalArgs<'static> {
        EvalArgs {
            gt: "gt.flo",
            pred: "pred.flo",
            sparse: false,
            meta,
            config,
        }
    }

    #[test]
    fn identical_flow() {
        let gt = constant(8, 6, 1.0, 2.0);
        let (report, _) = evaluate(client(&gt, &gt), &args(None, None)).unwrap();
        assert_eq!(report.epe, 0.0);
        assert_eq!(report.valid_pixels, 48);
    }

    #[test]
    fn padded_prediction_is_reverted() {
        let gt = constant(8, 6, 3.0, 4.0);
        let pred = constant(10, 8, 3.0, 0.0);
        let meta = SampleMeta {
            ori_shape: (6, 8),
            img_shape: (8, 10),
            pad: Some([(1, 1), (1, 1)]),
            scale_factor: None,
        };

        let (report, reverted) = evaluate(client(&gt, &pred), &args(Some(meta), None)).unwrap();
        assert_eq!(reverted.dim(), (8, 6));
        assert!((report.epe - 4.0).abs() < 1e-5);
    }

    #[test]
    fn configured_loss_reported() {
        let gt = constant(4, 4, 1.0, 0.0);
        let config = DecoderConfig {
            flow_div: 1.0,
            flow_loss: LossConfig::MultiLevelEpe(MultiLevelEpe::new(vec![1.0], 1.0)),
            occ_loss: None,
        };
        let (report, _) = evaluate(client(&gt, &gt), &args(None, Some(config))).unwrap();
        let (name, value) = report.configured_loss.unwrap();
        assert_eq!(name, "MultiLevelEPE");
        assert_eq!(value, 0.0);
    }

    #[test]
    fn configured_loss_uses_network_units() {
        let gt = constant(4, 4, 20.0, 0.0);
        let config = DecoderConfig {
            flow_div: 20.0,
            flow_loss: LossConfig::MultiLevelEpe(MultiLevelEpe::new(vec![1.0], 20.0)),
            occ_loss: None,
        };
        let pred = constant(4, 4, 1.0, 0.0);
        let (report, reverted) = evaluate(client(&gt, &pred), &args(None, Some(config))).unwrap();
        assert_eq!(reverted.get_motion(0, 0).x, 20.0);
        assert_eq!(report.configured_loss.unwrap().1, 0.0);
    }

    #[test]
    fn non_ascii_prediction_path() {
        let gt = constant(4, 3, 1.0, 0.0);
        let mut client = MemoryBackend::new();
        client.insert("gt.flo", write_flo(&gt));
        client.insert("prédiction_ü.flo", write_flo(&gt));

        let args = EvalArgs {
            pred: "prédiction_ü.flo",
            ..args(None, None)
        };
        let (report, _) = evaluate(Box::new(client), &args).unwrap();
        assert_eq!(report.epe, 0.0);
    }

    #[test]
    fn size_mismatch_is_error() {
        let gt = constant(8, 6, 0.0, 0.0);
        let pred = constant(4, 3, 0.0, 0.0);
        assert!(evaluate(client(&gt, &pred), &args(None, None)).is_err());
    }

    #[test]
    fn config_from_json() {
        let cfg: DecoderConfig = serde_json::from_str(
            r#"{
                "flow_div": 20.0,
                "flow_loss": { "type": "MultiLevelCharbonnierLoss", "weights": [0.5, 1.0], "flow_div": 20.0, "eps": 0.01 },
                "occ_loss": { "type": "MultiLevelBCE", "weights": [1.0] }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.flow_loss.name(), "MultiLevelCharbonnierLoss");
        assert!(build_occ_loss(cfg.occ_loss.as_ref().unwrap()).is_ok());
        assert!(PyramidDecoder::from_config(&cfg).is_ok());
    }

    #[test]
    fn meta_from_json() {
        let meta: SampleMeta = serde_json::from_str(
            r#"{ "ori_shape": [100, 100], "img_shape": [50, 50], "scale_factor": [0.5, 0.5] }"#,
        )
        .unwrap();
        assert_eq!(meta.scale_factor, Some((0.5, 0.5)));
        assert!(meta.pad.is_none());
    }
}
