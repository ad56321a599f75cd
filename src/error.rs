//! Error types returned by the extraction pipeline.

use thiserror::Error;

use crate::affinity::ThreadToken;
use crate::config::Resolution;
use crate::hand::HandSide;
use crate::scale::ScaleMode;

/// Errors reported by [`HandExtractor`][crate::extractor::HandExtractor] and its components.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The extractor was constructed with an invalid configuration.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// A result or buffer accessor was called before [`HandExtractor::initialize`].
    ///
    /// [`HandExtractor::initialize`]: crate::extractor::HandExtractor::initialize
    #[error("hand extractor is not initialized")]
    NotInitialized,

    /// A device-touching operation was invoked from a thread that does not own the extractor.
    #[error("cross-thread device access: owned by {owner:?}, called from {caller:?}")]
    CrossThreadAccess {
        owner: ThreadToken,
        caller: ThreadToken,
    },

    /// The backend failed while warming up during initialization.
    #[error("inference backend warm-up failed: {0:#}")]
    Warmup(#[source] anyhow::Error),

    /// The backend failed to evaluate one scale of a hand crop.
    #[error("inference failed for {side:?} hand at scale {scale}: {source:#}")]
    Inference {
        side: HandSide,
        scale: f32,
        #[source]
        source: anyhow::Error,
    },

    /// A hand crop handed to the extractor was empty or not square.
    #[error("{side:?} hand crop must be square and non-empty, got {width}x{height}")]
    InvalidCrop {
        side: HandSide,
        width: u32,
        height: u32,
    },
}

impl ExtractError {
    /// Returns whether this error only affects a single hand side of a single frame.
    ///
    /// Such errors leave the previously published result for that side in place; all other errors
    /// are caused by misuse of the extractor.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Inference { .. } | Self::InvalidCrop { .. })
    }
}

/// Reasons an [`ExtractorConfig`][crate::config::ExtractorConfig] is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("net input and output size must be equal ({input} vs. {output})")]
    NetSizeMismatch {
        input: Resolution,
        output: Resolution,
    },

    #[error("net input size must be square, got {0}")]
    NonSquareNet(Resolution),

    #[error("net size must not be zero")]
    EmptyNet,

    #[error("unsupported scale mode {0:?}, heatmaps must use zero-to-one, plus-minus-one or unsigned-char")]
    UnsupportedScaleMode(ScaleMode),

    #[error("invalid scale setup: {count} scales spanning {range}")]
    InvalidScales { count: u16, range: f32 },

    #[error("number of keypoints must be at least 1")]
    NoKeypoints,

    #[error("confidence floor must be finite, got {0}")]
    InvalidConfidenceFloor(f32),

    #[error("invalid input color range {start}..={end}")]
    InvalidInputRange { start: f32, end: f32 },
}
