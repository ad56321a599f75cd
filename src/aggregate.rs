//! Multi-scale heatmap aggregation.
//!
//! A hand crop is evaluated at several zoom levels around its center. Each evaluation yields one
//! heatmap per keypoint channel, aligned with the zoomed view of the crop. Those heatmaps are
//! resampled back onto the reference (scale 1.0) grid and merged with an element-wise maximum, so
//! a keypoint that is only confidently detected at one zoom level still shows up in the merged
//! field.

use std::borrow::Cow;

use image::RgbImage;

use crate::config::ExtractorConfig;
use crate::device::DeviceBuffers;
use crate::error::ExtractError;
use crate::hand::HandSide;
use crate::heatmap::{Heatmap, HeatmapStack};
use crate::nn::{tensor::Tensor, ColorMapper, InferenceBackend};
use crate::timer::StageTimers;

/// Runs hand crops through an [`InferenceBackend`] at several scales and merges the results.
#[derive(Debug, Clone)]
pub struct MultiScaleAggregator {
    scales: Vec<f32>,
    net_side: usize,
    color: ColorMapper,
    num_keypoints: usize,
}

impl MultiScaleAggregator {
    /// Creates an aggregator evaluating crops at the given scale factors.
    ///
    /// # Panics
    ///
    /// Panics if `scales` is empty or contains a non-positive factor.
    #[track_caller]
    pub fn new(scales: Vec<f32>, net_side: usize, color: ColorMapper, num_keypoints: usize) -> Self {
        assert!(!scales.is_empty(), "at least one scale is required");
        assert!(
            scales.iter().all(|&s| s > 0.0),
            "scale factors must be positive: {scales:?}"
        );
        Self {
            scales,
            net_side,
            color,
            num_keypoints,
        }
    }

    /// Creates an aggregator from a validated configuration.
    pub(crate) fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(
            config.scale_factors(),
            config.net_side() as usize,
            ColorMapper::linear(config.input_range.clone()),
            config.num_keypoints(),
        )
    }

    #[inline]
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    #[inline]
    pub fn net_side(&self) -> usize {
        self.net_side
    }

    /// Returns the network input value of a black pixel.
    #[inline]
    pub fn black(&self) -> f32 {
        self.color.black()
    }

    /// Writes `crop`, zoomed by `scale` about its center, into a `[1, 3, S, S]` staging tensor.
    ///
    /// Scales above 1.0 zoom in, scales below 1.0 zoom out. Net pixels that fall outside of the
    /// crop are filled with black. Crop pixels are sampled with nearest-neighbor interpolation.
    ///
    /// # Panics
    ///
    /// Panics if `staging` does not have shape `[1, 3, S, S]`.
    #[track_caller]
    pub fn stage(&self, crop: &RgbImage, scale: f32, staging: &mut Tensor) {
        let n = self.net_side;
        assert_eq!(staging.shape(), &[1, 3, n, n], "invalid staging tensor");

        let crop_side = crop.width();
        let step = crop_side as f32 / n as f32 / scale;
        let net_center = (n as f32 - 1.0) / 2.0;
        let crop_center = (crop_side as f32 - 1.0) / 2.0;
        let coords: Vec<Option<u32>> = (0..n)
            .map(|u| {
                let pos = (crop_center + (u as f32 - net_center) * step).round();
                (pos >= 0.0 && pos < crop_side as f32).then_some(pos as u32)
            })
            .collect();

        let plane = n * n;
        let black = self.color.black();
        let data = staging.as_raw_data_mut();
        for (y, cy) in coords.iter().enumerate() {
            for (x, cx) in coords.iter().enumerate() {
                let idx = y * n + x;
                let rgb = match (cx, cy) {
                    (Some(cx), Some(cy)) => self.color.map(*crop.get_pixel(*cx, *cy)),
                    _ => [black; 3],
                };
                for (ch, value) in rgb.into_iter().enumerate() {
                    data[ch * plane + idx] = value;
                }
            }
        }
    }

    /// Maps a heatmap estimated at `scale` back onto the reference grid.
    ///
    /// Reference cell `x` corresponds to `c + (x - c) * scale` in the scaled heatmap, where `c`
    /// is the grid center. Cells whose position falls outside of the scaled heatmap are 0.0.
    pub fn resample_to_reference(&self, heatmap: &Heatmap, scale: f32) -> Heatmap {
        let n = self.net_side;
        let heatmap = if (heatmap.width(), heatmap.height()) == (n, n) {
            Cow::Borrowed(heatmap)
        } else {
            Cow::Owned(heatmap.resized(n, n))
        };
        if scale == 1.0 {
            return heatmap.into_owned();
        }

        let center = (n as f32 - 1.0) / 2.0;
        let coords: Vec<f32> = (0..n)
            .map(|x| center + (x as f32 - center) * scale)
            .collect();
        Heatmap::from_fn(n, n, |x, y| {
            heatmap.sample(coords[x], coords[y]).unwrap_or(0.0)
        })
    }

    /// Evaluates one hand crop at every scale and returns the merged keypoint heatmaps.
    ///
    /// The raw backend output of the last evaluated scale is kept in `buffers`. Fails without a
    /// partial result if the crop is not square or if the backend fails at any scale.
    pub fn evaluate<B: InferenceBackend + ?Sized>(
        &self,
        backend: &mut B,
        buffers: &mut DeviceBuffers,
        side: HandSide,
        crop: &RgbImage,
        timers: &StageTimers,
    ) -> Result<HeatmapStack, ExtractError> {
        let (width, height) = crop.dimensions();
        if width != height || width == 0 {
            return Err(ExtractError::InvalidCrop {
                side,
                width,
                height,
            });
        }

        let mut merged = HeatmapStack::new();
        for &scale in &self.scales {
            self.stage(crop, scale, buffers.staging_mut());
            let output = timers
                .infer
                .time(|| backend.estimate(buffers.staging()))
                .map_err(|source| ExtractError::Inference {
                    side,
                    scale,
                    source,
                })?;

            let _guard = timers.merge.start();
            let stack = HeatmapStack::from_tensor(&output, self.num_keypoints).map_err(
                |source| ExtractError::Inference {
                    side,
                    scale,
                    source,
                },
            )?;
            let resampled: HeatmapStack = stack
                .iter()
                .map(|heatmap| self.resample_to_reference(heatmap, scale))
                .collect();
            merged.max_assign(&resampled);
            buffers.raw_output_mut()[side] = Some(output);
        }

        log::trace!(
            "{side:?} hand: merged {} channels from {} scales",
            merged.len(),
            self.scales.len()
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use image::Rgb;

    use super::*;
    use crate::decode::KeypointDecoder;
    use crate::test::{blob_crop, FailingBackend, RedChannelBackend};

    fn aggregator(scales: Vec<f32>, net_side: usize) -> MultiScaleAggregator {
        MultiScaleAggregator::new(scales, net_side, ColorMapper::linear(-0.5..=0.5), 1)
    }

    #[test]
    fn identity_staging() {
        let agg = aggregator(vec![1.0], 4);
        let crop = RgbImage::from_fn(4, 4, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 255]));
        let mut staging = Tensor::zeros(&[1, 3, 4, 4]);
        agg.stage(&crop, 1.0, &mut staging);

        let color = ColorMapper::linear(-0.5..=0.5);
        let data = staging.as_raw_data();
        assert_eq!(data[2 * 4 + 3], color.map(Rgb([30, 20, 255]))[0]);
        assert_eq!(data[16 + 2 * 4 + 3], color.map(Rgb([30, 20, 255]))[1]);
        assert_eq!(data[32], 0.5);
    }

    #[test]
    fn staging_downscales_larger_crops() {
        let agg = aggregator(vec![1.0], 4);
        let crop = RgbImage::from_fn(8, 8, |x, _| Rgb([(x * 30) as u8, 0, 0]));
        let mut staging = Tensor::zeros(&[1, 3, 4, 4]);
        agg.stage(&crop, 1.0, &mut staging);
        let red: Vec<f32> = staging.as_raw_data()[..4].to_vec();
        assert!(red.windows(2).all(|w| w[0] < w[1]), "{red:?}");
    }

    #[test]
    fn zoomed_out_crops_get_black_borders() {
        let agg = aggregator(vec![0.5], 8);
        let crop = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        let mut staging = Tensor::zeros(&[1, 3, 8, 8]);
        agg.stage(&crop, 0.5, &mut staging);
        let data = staging.as_raw_data();
        assert_eq!(data[0], -0.5);
        assert_eq!(data[3 * 8 + 3], 0.5);
    }

    #[test]
    fn resample_identity_and_zoom() {
        let agg = aggregator(vec![1.0], 9);
        let hm = Heatmap::from_fn(9, 9, |x, _| x as f32);
        assert_eq!(agg.resample_to_reference(&hm, 1.0), hm);

        // Zoomed in by 2: reference cell 2 was seen at cell 4 + (2 - 4) * 2 = 0.
        let back = agg.resample_to_reference(&hm, 2.0);
        assert_eq!(back.get(2, 4), 0.0);
        assert_eq!(back.get(4, 4), 4.0);
        assert_eq!(back.get(6, 4), 8.0);
        // Outside of the zoomed field.
        assert_eq!(back.get(0, 4), 0.0);
        assert_eq!(back.get(8, 4), 0.0);

        let small = Heatmap::from_fn(3, 3, |_, _| 1.0);
        let up = agg.resample_to_reference(&small, 1.0);
        assert_eq!((up.width(), up.height()), (9, 9));
    }

    #[test]
    fn merged_dominates_every_scale() {
        let net_side = 32;
        let crop = blob_crop(48, 20.0, 26.0, 3.0);
        let mut backend = RedChannelBackend;
        let timers = StageTimers::new();

        let mut buffers = DeviceBuffers::acquire(net_side, -0.5);
        let single = aggregator(vec![1.0], net_side)
            .evaluate(&mut backend, &mut buffers, HandSide::Left, &crop, &timers)
            .unwrap();
        let multi = aggregator(vec![0.8, 1.0, 1.2], net_side)
            .evaluate(&mut backend, &mut buffers, HandSide::Left, &crop, &timers)
            .unwrap();

        assert_eq!(multi.len(), 1);
        let (single, multi) = (single.get(0).unwrap(), multi.get(0).unwrap());
        for (s, m) in single.values().iter().zip(multi.values()) {
            assert!(m >= s, "{m} < {s}");
        }
        assert_eq!(timers.infer.count(), 4);
        assert!(buffers.raw_output()[HandSide::Left].is_some());
    }

    #[test]
    fn coarse_output_keeps_cell_centers() {
        /// Emits an 8x8 field with a single hot cell, whatever the input size.
        struct Coarse;
        impl InferenceBackend for Coarse {
            fn estimate(&mut self, _: &Tensor) -> anyhow::Result<Tensor> {
                Ok(Tensor::from_nchw_fn([1, 1, 8, 8], |[_, _, y, x]| {
                    if (x, y) == (6, 6) {
                        1.0
                    } else {
                        0.0
                    }
                }))
            }
        }

        let agg = aggregator(vec![1.0], 64);
        let mut buffers = DeviceBuffers::acquire(64, -0.5);
        let crop = RgbImage::new(64, 64);
        let merged = agg
            .evaluate(
                &mut Coarse,
                &mut buffers,
                HandSide::Left,
                &crop,
                &StageTimers::new(),
            )
            .unwrap();

        let decoder = KeypointDecoder::new(0.05);
        let field = Coarse.estimate(&Tensor::zeros(&[1, 3, 64, 64])).unwrap();
        let field = HeatmapStack::from_tensor(&field, 1).unwrap();
        let direct = decoder.decode_field(field.get(0).unwrap(), 64.0);
        let merged = decoder.decode(&merged, 64.0).get(0).unwrap();

        assert_relative_eq!(direct.x, 51.5);
        assert!((merged.x - direct.x).abs() < 0.1, "{merged:?} vs {direct:?}");
        assert!((merged.y - direct.y).abs() < 0.1, "{merged:?} vs {direct:?}");
    }

    #[test]
    fn failures_carry_side_and_scale() {
        let agg = aggregator(vec![0.9, 1.1], 8);
        let mut buffers = DeviceBuffers::acquire(8, -0.5);
        let crop = blob_crop(8, 4.0, 4.0, 1.0);
        let err = agg
            .evaluate(
                &mut FailingBackend,
                &mut buffers,
                HandSide::Right,
                &crop,
                &StageTimers::new(),
            )
            .unwrap_err();
        match err {
            ExtractError::Inference { side, scale, .. } => {
                assert_eq!(side, HandSide::Right);
                assert_eq!(scale, 0.9);
            }
            err => panic!("unexpected error {err}"),
        }
    }

    #[test]
    fn rejects_non_square_crops() {
        let agg = aggregator(vec![1.0], 8);
        let mut buffers = DeviceBuffers::acquire(8, -0.5);
        let err = agg
            .evaluate(
                &mut RedChannelBackend,
                &mut buffers,
                HandSide::Left,
                &RgbImage::new(8, 6),
                &StageTimers::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::InvalidCrop {
                width: 8,
                height: 6,
                ..
            }
        ));
    }
}
