//! Extractor configuration.

use std::{fmt, ops::RangeInclusive, str::FromStr};

use thiserror::Error;

use crate::error::ConfigError;
use crate::hand::HandLandmark;
use crate::scale::ScaleMode;

/// Resolution (`width x height`) of a network input or output.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// Creates a new [`Resolution`] of `width x height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Creates a square resolution of `side x side`.
    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn is_square(&self) -> bool {
        self.width == self.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Kinds of auxiliary heatmap channels a consumer can ask for.
///
/// Hand networks only produce keypoint channels. Requesting any kind enables heatmap export, but
/// only keypoint heatmaps will ever be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeatmapKind {
    /// One channel per keypoint.
    Parts,
    /// The background channel.
    Background,
    /// Part affinity fields.
    Pafs,
}

/// Error returned when parsing an unknown [`HeatmapKind`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown heatmap kind '{0}'")]
pub struct ParseHeatmapKindError(String);

impl FromStr for HeatmapKind {
    type Err = ParseHeatmapKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "parts" => HeatmapKind::Parts,
            "background" => HeatmapKind::Background,
            "pafs" => HeatmapKind::Pafs,
            _ => return Err(ParseHeatmapKindError(s.to_string())),
        })
    }
}

/// What to publish for a hand side that has no crop in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingHandPolicy {
    /// Keep the result of the last frame that had a crop for this hand.
    #[default]
    KeepStale,
    /// Publish undetected keypoints and no heatmaps.
    Clear,
}

/// Configuration of a [`HandExtractor`][crate::extractor::HandExtractor].
///
/// Created with [`ExtractorConfig::new`] and adjusted with the `with_*` methods. The configuration
/// is validated when the extractor is created and cannot be changed afterwards.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub(crate) net_input: Resolution,
    pub(crate) net_output: Resolution,
    pub(crate) num_scales: u16,
    pub(crate) scale_range: f32,
    pub(crate) heatmap_kinds: Vec<HeatmapKind>,
    pub(crate) scale_mode: ScaleMode,
    pub(crate) num_keypoints: usize,
    pub(crate) confidence_floor: f32,
    pub(crate) missing_hand: MissingHandPolicy,
    pub(crate) input_range: RangeInclusive<f32>,
}

impl ExtractorConfig {
    pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.05;

    /// Creates a configuration for a network with the given input and output resolution.
    ///
    /// Both must be equal and square. Defaults: a single scale, no heatmap export,
    /// [`ScaleMode::ZeroToOne`], [`HandLandmark::COUNT`] keypoints, a confidence floor of
    /// [`ExtractorConfig::DEFAULT_CONFIDENCE_FLOOR`], stale results for missing hands, and input
    /// colors mapped to `-0.5..=0.5`.
    pub fn new(net_input: Resolution, net_output: Resolution) -> Self {
        Self {
            net_input,
            net_output,
            num_scales: 1,
            scale_range: 0.0,
            heatmap_kinds: Vec::new(),
            scale_mode: ScaleMode::ZeroToOne,
            num_keypoints: HandLandmark::COUNT,
            confidence_floor: Self::DEFAULT_CONFIDENCE_FLOOR,
            missing_hand: MissingHandPolicy::KeepStale,
            input_range: -0.5..=0.5,
        }
    }

    /// Shorthand for a network with `side x side` input and output.
    pub fn square(side: u32) -> Self {
        Self::new(Resolution::square(side), Resolution::square(side))
    }

    /// Evaluates every crop at `count` scales spread evenly over `range`, centered on 1.0.
    ///
    /// For example, 3 scales with a range of 0.4 evaluate the crop at 0.8, 1.0 and 1.2.
    pub fn with_scales(self, count: u16, range: f32) -> Self {
        Self {
            num_scales: count,
            scale_range: range,
            ..self
        }
    }

    /// Requests heatmap export. An empty list disables it.
    pub fn with_heatmaps<K: Into<Vec<HeatmapKind>>>(self, kinds: K) -> Self {
        Self {
            heatmap_kinds: kinds.into(),
            ..self
        }
    }

    /// Sets the value range of exported heatmaps.
    pub fn with_scale_mode(self, mode: ScaleMode) -> Self {
        Self {
            scale_mode: mode,
            ..self
        }
    }

    /// Sets the number of keypoint channels to decode.
    pub fn with_keypoints(self, count: usize) -> Self {
        Self {
            num_keypoints: count,
            ..self
        }
    }

    /// Sets the minimum peak value required to report a keypoint.
    pub fn with_confidence_floor(self, floor: f32) -> Self {
        Self {
            confidence_floor: floor,
            ..self
        }
    }

    pub fn with_missing_hand_policy(self, policy: MissingHandPolicy) -> Self {
        Self {
            missing_hand: policy,
            ..self
        }
    }

    /// Sets the range that 8-bit crop colors are mapped to before inference.
    pub fn with_input_range(self, range: RangeInclusive<f32>) -> Self {
        Self {
            input_range: range,
            ..self
        }
    }

    /// Returns the side length of the square network input and output.
    pub fn net_side(&self) -> u32 {
        self.net_input.width()
    }

    pub fn num_keypoints(&self) -> usize {
        self.num_keypoints
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    /// Returns whether heatmaps are exported alongside keypoints.
    pub fn exports_heatmaps(&self) -> bool {
        !self.heatmap_kinds.is_empty()
    }

    /// Returns the policy applied to hands without a crop.
    pub fn missing_hand_policy(&self) -> MissingHandPolicy {
        self.missing_hand
    }

    /// Returns the scale factors each crop is evaluated at, in ascending order.
    pub fn scale_factors(&self) -> Vec<f32> {
        scale_factors(self.num_scales, self.scale_range)
    }

    /// Checks every invariant of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.net_input != self.net_output {
            return Err(ConfigError::NetSizeMismatch {
                input: self.net_input,
                output: self.net_output,
            });
        }
        if !self.net_input.is_square() {
            return Err(ConfigError::NonSquareNet(self.net_input));
        }
        if self.net_input.width() == 0 {
            return Err(ConfigError::EmptyNet);
        }
        if !self.scale_mode.is_heatmap_mode() {
            return Err(ConfigError::UnsupportedScaleMode(self.scale_mode));
        }
        // The smallest factor is `1 - range / 2` and has to stay positive.
        if self.num_scales == 0 || !(0.0..2.0).contains(&self.scale_range) {
            return Err(ConfigError::InvalidScales {
                count: self.num_scales,
                range: self.scale_range,
            });
        }
        if self.num_keypoints == 0 {
            return Err(ConfigError::NoKeypoints);
        }
        if !self.confidence_floor.is_finite() {
            return Err(ConfigError::InvalidConfidenceFloor(self.confidence_floor));
        }
        let (start, end) = (*self.input_range.start(), *self.input_range.end());
        if !(start.is_finite() && end.is_finite() && end > start) {
            return Err(ConfigError::InvalidInputRange { start, end });
        }
        Ok(())
    }
}

/// Computes `count` scale factors linearly spaced over `range` and centered on 1.0.
///
/// A single scale is always exactly 1.0.
pub fn scale_factors(count: u16, range: f32) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![1.0],
        n => (0..n)
            .map(|i| 1.0 - range / 2.0 + f32::from(i) * range / f32::from(n - 1))
            .collect(),
    }
}
