//! Keypoint decoding from confidence fields.
//!
//! Each keypoint channel is reduced to a single peak: the global maximum of the field, refined to
//! sub-cell precision by fitting a parabola through the maximum and its direct neighbors along
//! each axis. Channels are independent of each other and can be decoded in any order or in
//! parallel.

use crate::hand::HandLandmark;
use crate::heatmap::{Heatmap, HeatmapStack};

/// A decoded keypoint in crop coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Peak value of the keypoint's confidence field, or 0.0 if no peak was found.
    pub confidence: f32,
}

impl Keypoint {
    /// Placeholder for keypoints whose confidence field has no usable peak.
    pub const UNDETECTED: Self = Self {
        x: -1.0,
        y: -1.0,
        confidence: 0.0,
    };

    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// Returns whether a peak was found for this keypoint.
    pub fn is_detected(&self) -> bool {
        self.confidence > 0.0
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self::UNDETECTED
    }
}

/// The decoded keypoints of one hand, in network channel order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointSet {
    keypoints: Box<[Keypoint]>,
}

impl KeypointSet {
    /// Creates a set of `len` undetected keypoints.
    pub fn undetected(len: usize) -> Self {
        Self {
            keypoints: vec![Keypoint::UNDETECTED; len].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Keypoint> {
        self.keypoints.get(index).copied()
    }

    /// Returns the keypoint for a named hand landmark.
    ///
    /// Returns [`None`] if the network produced fewer channels than [`HandLandmark::COUNT`].
    pub fn landmark(&self, landmark: HandLandmark) -> Option<Keypoint> {
        self.get(landmark as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = Keypoint> + '_ {
        self.keypoints.iter().copied()
    }

    pub fn as_slice(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Returns the mean confidence of all keypoints (undetected ones count as 0.0).
    pub fn average_confidence(&self) -> f32 {
        if self.keypoints.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.keypoints.iter().map(|kp| kp.confidence).sum();
        sum / self.keypoints.len() as f32
    }
}

impl FromIterator<Keypoint> for KeypointSet {
    fn from_iter<I: IntoIterator<Item = Keypoint>>(iter: I) -> Self {
        Self {
            keypoints: iter.into_iter().collect(),
        }
    }
}

/// Decodes confidence fields into keypoints.
#[derive(Debug, Clone, Copy)]
pub struct KeypointDecoder {
    confidence_floor: f32,
}

impl KeypointDecoder {
    /// Creates a decoder that reports fields whose maximum lies below `confidence_floor` as
    /// [`Keypoint::UNDETECTED`].
    pub fn new(confidence_floor: f32) -> Self {
        Self { confidence_floor }
    }

    #[inline]
    pub fn confidence_floor(&self) -> f32 {
        self.confidence_floor
    }

    /// Decodes every channel of `stack` into a keypoint in the coordinates of a square crop with
    /// side length `crop_side`.
    pub fn decode(&self, stack: &HeatmapStack, crop_side: f32) -> KeypointSet {
        stack
            .iter()
            .map(|field| self.decode_field(field, crop_side))
            .collect()
    }

    /// Decodes a single confidence field.
    ///
    /// The field covers the whole crop; cell centers are spread evenly over it, so cell `(x, y)`
    /// of an `N x N` field maps to `((x + 0.5) * crop_side / N - 0.5, ...)`. The reported
    /// confidence is the raw value of the maximum cell.
    pub fn decode_field(&self, field: &Heatmap, crop_side: f32) -> Keypoint {
        let Some((x, y, peak)) = field.argmax() else {
            return Keypoint::UNDETECTED;
        };
        if peak < self.confidence_floor || peak <= 0.0 {
            return Keypoint::UNDETECTED;
        }

        let dx = if x > 0 && x + 1 < field.width() {
            parabola_offset(field.get(x - 1, y), peak, field.get(x + 1, y))
        } else {
            0.0
        };
        let dy = if y > 0 && y + 1 < field.height() {
            parabola_offset(field.get(x, y - 1), peak, field.get(x, y + 1))
        } else {
            0.0
        };

        let to_crop = |cell: f32, len: usize| (cell + 0.5) * crop_side / len as f32 - 0.5;
        Keypoint {
            x: to_crop(x as f32 + dx, field.width()),
            y: to_crop(y as f32 + dy, field.height()),
            confidence: peak,
        }
    }
}

/// Returns the position of the vertex of the parabola through `(-1, left)`, `(0, center)` and
/// `(1, right)`, relative to the center sample.
///
/// `center` is a maximum, so the vertex lies within half a cell of it. Flat neighborhoods yield
/// 0.0.
fn parabola_offset(left: f32, center: f32, right: f32) -> f32 {
    let curvature = left - 2.0 * center + right;
    if curvature >= 0.0 || !curvature.is_finite() {
        return 0.0;
    }
    (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
}
