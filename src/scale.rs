//! Heatmap value scaling.
//!
//! Networks output heatmaps with values nominally in `0.0..=1.0`. Consumers may ask for a
//! different convention; [`HeatmapScaler`] maps every value independently and keeps the ordering of
//! values intact, so peaks stay where they were.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::error::ConfigError;
use crate::heatmap::{Heatmap, HeatmapStack};

/// Scale conventions used across the pose pipeline.
///
/// Only [`ScaleMode::ZeroToOne`], [`ScaleMode::PlusMinusOne`] and [`ScaleMode::UnsignedChar`] can
/// be applied to heatmap values; the others describe coordinate spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    /// Coordinates in the resolution of the original input image.
    InputResolution,
    /// Coordinates in the resolution of the network output.
    NetOutputResolution,
    /// Coordinates in the user-requested output resolution.
    OutputResolution,
    /// Values in `0.0..=1.0`.
    ZeroToOne,
    /// Values in `-1.0..=1.0`.
    PlusMinusOne,
    /// Values in `0.0..=255.0`, rounded to whole numbers.
    UnsignedChar,
    /// Values are passed through unchanged.
    NoScale,
}

impl ScaleMode {
    /// Returns whether this mode can be used to scale heatmap values.
    pub fn is_heatmap_mode(self) -> bool {
        matches!(
            self,
            ScaleMode::ZeroToOne | ScaleMode::PlusMinusOne | ScaleMode::UnsignedChar
        )
    }

    fn name(self) -> &'static str {
        match self {
            ScaleMode::InputResolution => "input-resolution",
            ScaleMode::NetOutputResolution => "net-output-resolution",
            ScaleMode::OutputResolution => "output-resolution",
            ScaleMode::ZeroToOne => "zero-to-one",
            ScaleMode::PlusMinusOne => "plus-minus-one",
            ScaleMode::UnsignedChar => "unsigned-char",
            ScaleMode::NoScale => "no-scale",
        }
    }
}

impl fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown [`ScaleMode`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scale mode '{0}'")]
pub struct ParseScaleModeError(String);

impl FromStr for ScaleMode {
    type Err = ParseScaleModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "input-resolution" => ScaleMode::InputResolution,
            "net-output-resolution" => ScaleMode::NetOutputResolution,
            "output-resolution" => ScaleMode::OutputResolution,
            "zero-to-one" | "unit" => ScaleMode::ZeroToOne,
            "plus-minus-one" | "symmetric" => ScaleMode::PlusMinusOne,
            "unsigned-char" | "byte" => ScaleMode::UnsignedChar,
            "no-scale" => ScaleMode::NoScale,
            _ => return Err(ParseScaleModeError(s.to_string())),
        })
    }
}

/// Maps raw heatmap values to the configured [`ScaleMode`].
#[derive(Debug, Clone, Copy)]
pub struct HeatmapScaler {
    mode: ScaleMode,
}

impl HeatmapScaler {
    /// Creates a scaler for `mode`.
    ///
    /// Returns [`ConfigError::UnsupportedScaleMode`] if `mode` does not describe a heatmap value
    /// range.
    pub fn new(mode: ScaleMode) -> Result<Self, ConfigError> {
        if !mode.is_heatmap_mode() {
            return Err(ConfigError::UnsupportedScaleMode(mode));
        }
        Ok(Self { mode })
    }

    #[inline]
    pub fn mode(&self) -> ScaleMode {
        self.mode
    }

    /// Scales a single raw value.
    ///
    /// Raw values are clamped to `0.0..=1.0` first. NaN is treated as `0.0`.
    pub fn scale(&self, raw: f32) -> f32 {
        // `f32::clamp` propagates NaN, `max` does not.
        let unit = raw.max(0.0).min(1.0);
        match self.mode {
            ScaleMode::PlusMinusOne => unit * 2.0 - 1.0,
            ScaleMode::UnsignedChar => (unit * 255.0).round(),
            _ => unit,
        }
    }

    pub fn scale_heatmap(&self, heatmap: &Heatmap) -> Heatmap {
        heatmap.map(|v| self.scale(v))
    }

    pub fn scale_stack(&self, stack: &HeatmapStack) -> HeatmapStack {
        stack.iter().map(|hm| self.scale_heatmap(hm)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEATMAP_MODES: [ScaleMode; 3] = [
        ScaleMode::ZeroToOne,
        ScaleMode::PlusMinusOne,
        ScaleMode::UnsignedChar,
    ];

    #[test]
    fn rejects_coordinate_modes() {
        for mode in [
            ScaleMode::InputResolution,
            ScaleMode::NetOutputResolution,
            ScaleMode::OutputResolution,
            ScaleMode::NoScale,
        ] {
            assert_eq!(
                HeatmapScaler::new(mode).unwrap_err(),
                ConfigError::UnsupportedScaleMode(mode)
            );
        }
    }

    #[test]
    fn range_endpoints() {
        let unit = HeatmapScaler::new(ScaleMode::ZeroToOne).unwrap();
        assert_eq!(unit.scale(0.0), 0.0);
        assert_eq!(unit.scale(1.0), 1.0);
        assert_eq!(unit.scale(1.5), 1.0);
        assert_eq!(unit.scale(-0.2), 0.0);

        let sym = HeatmapScaler::new(ScaleMode::PlusMinusOne).unwrap();
        assert_eq!(sym.scale(0.0), -1.0);
        assert_eq!(sym.scale(0.5), 0.0);
        assert_eq!(sym.scale(1.0), 1.0);

        let byte = HeatmapScaler::new(ScaleMode::UnsignedChar).unwrap();
        assert_eq!(byte.scale(0.0), 0.0);
        assert_eq!(byte.scale(1.0), 255.0);
        assert_eq!(byte.scale(0.5), 128.0);
        assert_eq!(byte.scale(f32::NAN), 0.0);
    }

    #[test]
    fn order_preserving() {
        let mut rng = fastrand::Rng::with_seed(0x5ca1e);
        for mode in HEATMAP_MODES {
            let scaler = HeatmapScaler::new(mode).unwrap();
            for _ in 0..10_000 {
                let a = rng.f32() * 1.6 - 0.3;
                let b = rng.f32() * 1.6 - 0.3;
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                assert!(
                    scaler.scale(lo) <= scaler.scale(hi),
                    "{mode}: scale({lo}) > scale({hi})"
                );
            }
        }
    }

    #[test]
    fn parse() {
        for mode in HEATMAP_MODES {
            assert_eq!(mode.to_string().parse::<ScaleMode>(), Ok(mode));
        }
        assert_eq!("byte".parse::<ScaleMode>(), Ok(ScaleMode::UnsignedChar));
        assert!("sideways".parse::<ScaleMode>().is_err());
    }
}
