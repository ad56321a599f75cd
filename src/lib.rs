//! Multi-scale hand keypoint extraction from heatmap networks.
//!
//! `heatpose` takes square crops of the left and right hand, evaluates them with a heatmap network
//! at several zoom levels, merges the resulting confidence fields and decodes one keypoint per
//! channel with sub-pixel refinement.
//!
//! The entry point is [`HandExtractor`][extractor::HandExtractor]. Networks are plugged in via the
//! [`InferenceBackend`][nn::InferenceBackend] trait; [`nn::onnx`] provides a CPU backend for ONNX
//! models.
//!
//! # Threading
//!
//! A [`HandExtractor`][extractor::HandExtractor] is owned by the thread that initializes it, and
//! only that thread may run extraction or access its device buffers. Results are published as
//! immutable [`Snapshot`][snapshot::Snapshot]s that any thread can read through a
//! [`SnapshotReader`][snapshot::SnapshotReader].
//!
//! # Coordinates
//!
//! Keypoints are reported in pixel coordinates of the hand crop they were extracted from, with the
//! origin in the top left corner and Y pointing *down*. Keypoints whose confidence field has no
//! peak above the configured floor are reported as
//! [`Keypoint::UNDETECTED`][decode::Keypoint::UNDETECTED].

use log::LevelFilter;

pub mod affinity;
pub mod aggregate;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod extractor;
pub mod hand;
pub mod heatmap;
pub mod nn;
pub mod scale;
pub mod snapshot;
pub mod timer;

#[cfg(test)]
mod test;

pub use config::ExtractorConfig;
pub use error::ExtractError;
pub use extractor::HandExtractor;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and `heatpose` will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `tract` will always log at *warn* level. `RUST_LOG` overrides all of the above.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
