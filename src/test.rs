//! Synthetic backends and crops shared by unit tests.

use image::{Rgb, RgbImage};

use crate::hand::HandLandmark;
use crate::nn::{tensor::Tensor, InferenceBackend};

/// Reports the red channel of the input as the first keypoint heatmap.
///
/// Assumes inputs mapped to `-0.5..=0.5`, so full red yields 1.0 and black yields 0.0. All other
/// keypoint channels are zero.
pub struct RedChannelBackend;

impl InferenceBackend for RedChannelBackend {
    fn estimate(&mut self, input: &Tensor) -> anyhow::Result<Tensor> {
        let &[1, 3, h, w] = input.shape() else {
            anyhow::bail!("unexpected input shape {:?}", input.shape());
        };
        let red = &input.as_raw_data()[..h * w];
        Ok(Tensor::from_nchw_fn(
            [1, HandLandmark::COUNT, h, w],
            |[_, c, y, x]| if c == 0 { red[y * w + x] + 0.5 } else { 0.0 },
        ))
    }
}

pub struct FailingBackend;

impl InferenceBackend for FailingBackend {
    fn estimate(&mut self, _: &Tensor) -> anyhow::Result<Tensor> {
        anyhow::bail!("backend failure")
    }

    fn warm_up(&mut self, _: &Tensor) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Creates a black `side x side` crop with a red gaussian blob centered on `(cx, cy)`.
pub fn blob_crop(side: u32, cx: f32, cy: f32, sigma: f32) -> RgbImage {
    RgbImage::from_fn(side, side, |x, y| {
        let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
        let red = 255.0 * (-d2 / (2.0 * sigma * sigma)).exp();
        Rgb([red.round() as u8, 0, 0])
    })
}
