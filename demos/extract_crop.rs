//! Runs hand keypoint extraction on square hand crops loaded from disk.
//!
//! Usage: `extract_crop <model.onnx> <left-crop> [<right-crop>]`
//!
//! Set `HEATPOSE_SCALE_MODE` (eg. `unsigned-char`) to export heatmaps in that value range, and
//! `HEATPOSE_SCALES` to the number of scales to evaluate each crop at.

use std::env;

use anyhow::{anyhow, Context};
use heatpose::{
    config::HeatmapKind,
    hand::{HandLandmark, HandSide, Hands},
    nn::onnx::OnnxBackend,
    scale::ScaleMode,
    ExtractorConfig, HandExtractor,
};
use image::RgbImage;

const USAGE: &str = "usage: extract_crop <model.onnx> <left-crop> [<right-crop>]";

fn load_crop(path: &str) -> anyhow::Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("failed to load '{path}'"))?;
    Ok(image.to_rgb8())
}

fn main() -> anyhow::Result<()> {
    heatpose::init_logger!();

    let mut args = env::args().skip(1);
    let model = args.next().ok_or_else(|| anyhow!(USAGE))?;
    let left = load_crop(&args.next().ok_or_else(|| anyhow!(USAGE))?)?;
    let right = args.next().map(|path| load_crop(&path)).transpose()?;

    let backend = OnnxBackend::from_path(&model)?.load()?;
    let side = backend.input_side() as u32;

    let mut config = ExtractorConfig::square(side);
    if let Ok(mode) = env::var("HEATPOSE_SCALE_MODE") {
        let mode: ScaleMode = mode.parse()?;
        config = config
            .with_heatmaps([HeatmapKind::Parts])
            .with_scale_mode(mode);
    }
    if let Ok(scales) = env::var("HEATPOSE_SCALES") {
        let count: u16 = scales.parse().context("invalid HEATPOSE_SCALES")?;
        config = config.with_scales(count, 0.4);
    }

    let mut extractor = HandExtractor::new(config, backend)?;
    extractor.initialize()?;
    let report = extractor.extract(Hands::new(Some(&left), right.as_ref()))?;
    for (side, err) in report.errors() {
        log::error!("{side:?} hand failed: {err:#}");
    }

    let snapshot = extractor.snapshot()?;
    for side in HandSide::ALL {
        if !report.outcome(side).is_updated() {
            continue;
        }
        let keypoints = &snapshot.keypoints()[side];
        println!(
            "{side:?} hand (avg. confidence {:.2}):",
            keypoints.average_confidence()
        );
        for (landmark, kp) in HandLandmark::ALL.iter().zip(keypoints.iter()) {
            if kp.is_detected() {
                println!("  {landmark:?}: ({:.1}, {:.1}) @ {:.3}", kp.x, kp.y, kp.confidence);
            } else {
                println!("  {landmark:?}: -");
            }
        }
        let heatmaps = &snapshot.heatmaps()[side];
        if !heatmaps.is_empty() {
            println!("  {} heatmaps exported", heatmaps.len());
        }
    }
    log::debug!("{}", extractor.timers());

    Ok(())
}
