//! Tensors passed to and returned from inference backends.
//!
//! A tensor is an N-dimensional array of `f32`s stored in row-major order. The pipeline only ever
//! needs 4-dimensional `NCHW` tensors (`[1, 3, S, S]` image inputs and `[1, C, S, S]` heatmap
//! outputs), but backends are free to return any rank they like; the consumers validate shapes.

use std::fmt;

use tinyvec::TinyVec;

/// Dimensions of a [`Tensor`].
type Shape = TinyVec<[usize; 4]>;

/// A dynamically shaped `f32` tensor.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Box<[f32]>,
}

impl Tensor {
    /// Creates a tensor of the given shape with all elements set to `0.0`.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.into(),
            data: vec![0.0; shape.iter().product()].into_boxed_slice(),
        }
    }

    /// Creates an `NCHW` tensor by calling `f` with every `[n, c, y, x]` index.
    ///
    /// `f` is invoked in memory order: `[0, 0, 0, 0]`, then `[0, 0, 0, 1]` and so on.
    pub fn from_nchw_fn(shape: [usize; 4], mut f: impl FnMut([usize; 4]) -> f32) -> Self {
        let [batch, channels, h, w] = shape;
        let mut data = Vec::with_capacity(batch * channels * h * w);
        for n in 0..batch {
            for c in 0..channels {
                for y in 0..h {
                    for x in 0..w {
                        data.push(f([n, c, y, x]));
                    }
                }
            }
        }
        Self {
            shape: (&shape[..]).into(),
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor of the given shape by pulling elements from an iterator.
    ///
    /// # Panics
    ///
    /// `iter` must yield exactly as many elements as specified by `shape` (by multiplying all of
    /// its entries), otherwise this method will panic.
    #[track_caller]
    pub fn from_iter<I: IntoIterator<Item = f32>>(shape: &[usize], iter: I) -> Self {
        let data: Box<[f32]> = iter.into_iter().collect();
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "tensor of shape {:?} created from {} elements",
            shape,
            data.len(),
        );
        Self {
            shape: shape.into(),
            data,
        }
    }

    pub(crate) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        let data = tract.as_slice::<f32>()?;
        Ok(Self::from_iter(tract.shape(), data.iter().copied()))
    }

    pub(crate) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        Ok(tract_onnx::prelude::Tensor::from_shape(
            self.shape(),
            &self.data[..],
        )?)
    }

    /// Returns the shape of this tensor.
    ///
    /// A tensor's shape is the number of entries in each dimension.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions of this tensor.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns all elements in row-major order.
    #[inline]
    pub fn as_raw_data(&self) -> &[f32] {
        &self.data
    }

    /// Returns all elements in row-major order, for in-place writes.
    #[inline]
    pub fn as_raw_data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .finish()
    }
}
