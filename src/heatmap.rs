//! Confidence fields produced by heatmap networks.

use std::fmt;

use crate::nn::tensor::Tensor;

/// A 2D grid of confidence values for a single keypoint channel.
///
/// Cells are stored in row-major order. Cell `(x, y)` is centered on the continuous coordinate
/// `(x as f32, y as f32)`.
#[derive(Clone, PartialEq)]
pub struct Heatmap {
    width: usize,
    height: usize,
    data: Box<[f32]>,
}

impl Heatmap {
    /// Creates a heatmap filled with zeroes.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height].into_boxed_slice(),
        }
    }

    /// Creates a heatmap by calling `f` with the coordinates of every cell, in row-major order.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a heatmap from row-major cell values.
    ///
    /// # Panics
    ///
    /// Panics if `values` does not contain exactly `width * height` elements.
    #[track_caller]
    pub fn from_slice(width: usize, height: usize, values: &[f32]) -> Self {
        assert_eq!(
            values.len(),
            width * height,
            "heatmap of size {width}x{height} created from {} values",
            values.len()
        );
        Self {
            width,
            height,
            data: values.into(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the row-major cell values.
    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.data
    }

    /// Returns the value of cell `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside of the heatmap.
    #[inline]
    #[track_caller]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        assert!(x < self.width && y < self.height);
        self.data[y * self.width + x]
    }

    #[inline]
    #[track_caller]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        assert!(x < self.width && y < self.height);
        self.data[y * self.width + x] = value;
    }

    /// Samples the heatmap at a continuous position with bilinear interpolation.
    ///
    /// Returns [`None`] if the position lies outside of the outermost cell centers.
    pub fn sample(&self, x: f32, y: f32) -> Option<f32> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let (max_x, max_y) = ((self.width - 1) as f32, (self.height - 1) as f32);
        if !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
            return None;
        }

        let (x0, y0) = (x.floor() as usize, y.floor() as usize);
        let (x1, y1) = ((x0 + 1).min(self.width - 1), (y0 + 1).min(self.height - 1));
        let (fx, fy) = (x - x0 as f32, y - y0 as f32);

        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        Some(top * (1.0 - fy) + bottom * fy)
    }

    /// Resizes the heatmap to `width x height` with bilinear interpolation.
    ///
    /// Cells are treated as unit squares: cell `x` of the result samples the source at
    /// `(x + 0.5) * from / to - 0.5`, the same cell-center convention keypoint decoding uses.
    /// Positions beyond the outermost source cell centers take the border value.
    pub fn resized(&self, width: usize, height: usize) -> Heatmap {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }

        fn coords(from: usize, to: usize) -> Vec<f32> {
            let max = from.saturating_sub(1) as f32;
            (0..to)
                .map(|i| ((i as f32 + 0.5) * from as f32 / to as f32 - 0.5).clamp(0.0, max))
                .collect()
        }
        let (xs, ys) = (coords(self.width, width), coords(self.height, height));
        Heatmap::from_fn(width, height, |x, y| {
            self.sample(xs[x], ys[y]).unwrap_or(0.0)
        })
    }

    /// Applies `f` to every cell, returning the resulting heatmap.
    pub fn map(&self, f: impl FnMut(f32) -> f32) -> Heatmap {
        Heatmap {
            width: self.width,
            height: self.height,
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Replaces every cell with the maximum of itself and the corresponding cell in `other`.
    ///
    /// # Panics
    ///
    /// Panics if the heatmaps have different sizes.
    #[track_caller]
    pub fn max_assign(&mut self, other: &Heatmap) {
        assert_eq!(
            (self.width, self.height),
            (other.width, other.height),
            "attempted to merge heatmaps of different sizes"
        );
        for (dest, &src) in self.data.iter_mut().zip(other.data.iter()) {
            *dest = dest.max(src);
        }
    }

    /// Returns the coordinates and value of the maximum cell.
    ///
    /// When several cells share the maximum value, the first one in row-major order wins. NaN cells
    /// are ignored. Returns [`None`] if the heatmap has no non-NaN cells.
    pub fn argmax(&self) -> Option<(usize, usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &v) in self.data.iter().enumerate() {
            match best {
                Some((_, max)) if v <= max => {}
                _ if v.is_nan() => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, v)| (i % self.width, i / self.width, v))
    }
}

impl fmt::Debug for Heatmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heatmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// The per-channel heatmaps estimated for one hand, in network channel order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatmapStack {
    channels: Vec<Heatmap>,
}

impl HeatmapStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a network output tensor into its first `channels` heatmaps.
    ///
    /// The tensor must have shape `[1, C, H, W]` or `[C, H, W]` with `C >= channels`. Trailing
    /// channels (eg. a background channel) are dropped.
    pub fn from_tensor(tensor: &Tensor, channels: usize) -> anyhow::Result<Self> {
        let (c, h, w) = match tensor.shape() {
            [1, c, h, w] | [c, h, w] => (*c, *h, *w),
            shape => anyhow::bail!(
                "expected heatmap tensor of shape [1, C, H, W], got {:?}",
                shape
            ),
        };
        if c < channels {
            anyhow::bail!(
                "network produced {} heatmap channels, {} are required",
                c,
                channels
            );
        }

        let data = tensor.as_raw_data();
        let plane = h * w;
        Ok((0..channels)
            .map(|i| Heatmap::from_slice(w, h, &data[i * plane..(i + 1) * plane]))
            .collect())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, channel: usize) -> Option<&Heatmap> {
        self.channels.get(channel)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Heatmap> {
        self.channels.iter()
    }

    /// Element-wise maximum merge of `other` into `self`, channel by channel.
    ///
    /// An empty stack adopts `other` as-is.
    ///
    /// # Panics
    ///
    /// Panics if both stacks are non-empty and differ in channel count or heatmap size.
    #[track_caller]
    pub fn max_assign(&mut self, other: &HeatmapStack) {
        if self.is_empty() {
            self.channels = other.channels.clone();
            return;
        }
        assert_eq!(self.len(), other.len(), "channel count mismatch");
        for (dest, src) in self.channels.iter_mut().zip(&other.channels) {
            dest.max_assign(src);
        }
    }
}

impl FromIterator<Heatmap> for HeatmapStack {
    fn from_iter<I: IntoIterator<Item = Heatmap>>(iter: I) -> Self {
        Self {
            channels: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HeatmapStack {
    type Item = &'a Heatmap;
    type IntoIter = std::slice::Iter<'a, Heatmap>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
