//! Neural Network inference.
//!
//! The extraction pipeline talks to networks through the [`InferenceBackend`] trait. [`onnx`]
//! provides an implementation on top of [`tract_onnx`]; tests and embedders can plug in their own.

pub mod onnx;
pub mod tensor;

use std::ops::RangeInclusive;

use image::Rgb;
use tensor::Tensor;

/// A heatmap network that can be run on square image tensors.
///
/// Backends receive `[1, 3, S, S]` tensors (`NCHW`, color values already mapped by a
/// [`ColorMapper`]) and must return one heatmap per keypoint channel at the same resolution, as a
/// `[1, C, S, S]` tensor. Additional trailing channels are allowed and ignored.
///
/// Backends may hold device resources, so they are only required to be [`Send`]: the extractor
/// that owns a backend only ever calls it from one thread.
pub trait InferenceBackend: Send {
    /// Runs the network once.
    #[doc(alias = "infer")]
    fn estimate(&mut self, input: &Tensor) -> anyhow::Result<Tensor>;

    /// Prepares the backend for inference, eg. by allocating device memory or compiling kernels.
    ///
    /// Called once during extractor initialization with a tensor holding an all-black image
    /// (every value is [`ColorMapper::black`]). The default implementation runs one throwaway
    /// inference pass.
    fn warm_up(&mut self, input: &Tensor) -> anyhow::Result<()> {
        self.estimate(input).map(drop)
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn estimate(&mut self, input: &Tensor) -> anyhow::Result<Tensor> {
        (**self).estimate(input)
    }

    fn warm_up(&mut self, input: &Tensor) -> anyhow::Result<()> {
        (**self).warm_up(input)
    }
}

/// Maps 8-bit RGB colors to the value range expected by a network.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    target_range: RangeInclusive<f32>,
}

impl ColorMapper {
    /// Creates a simple color mapper that uniformly maps sRGB values to `target_range`.
    ///
    /// Note that this operates on *non-linear* sRGB colors, but maps them linearly to the target
    /// range. Hand heatmap networks are usually trained on `-0.5..=0.5`.
    ///
    /// # Panics
    ///
    /// Panics if the end of `target_range` is not greater than its start.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());
        Self { target_range }
    }

    /// Maps one color, returning the `[r, g, b]` channel values.
    pub fn map(&self, color: Rgb<u8>) -> [f32; 3] {
        let start = *self.target_range.start();
        let end = *self.target_range.end();

        let adjust_range = (end - start) / 255.0;
        color.0.map(|col| col as f32 * adjust_range + start)
    }

    /// Returns the mapped value of a black pixel, used to pad areas outside of a crop.
    pub fn black(&self) -> f32 {
        *self.target_range.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.map(Rgb([0, 0, 0])), [-1.0, -1.0, -1.0]);
        assert_eq!(mapper.map(Rgb([255, 255, 255])), [1.0, 1.0, 1.0]);

        let mapper = ColorMapper::linear(1.0..=2.0);
        assert_eq!(mapper.map(Rgb([0, 0, 0])), [1.0, 1.0, 1.0]);
        assert_eq!(mapper.map(Rgb([255, 255, 255])), [2.0, 2.0, 2.0]);
        assert_eq!(mapper.black(), 1.0);
    }

    #[test]
    #[should_panic]
    fn color_mapper_rejects_empty_range() {
        ColorMapper::linear(0.5..=0.5);
    }
}
