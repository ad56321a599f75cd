//! Immutable per-frame results and their cross-thread publication.

use std::sync::{Arc, Mutex, PoisonError};

use crate::decode::KeypointSet;
use crate::error::ExtractError;
use crate::hand::Hands;
use crate::heatmap::HeatmapStack;

/// The complete result of one extracted frame.
///
/// Snapshots are never modified after they are published. Each frame publishes a new snapshot that
/// replaces the previous one as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    frame_id: u64,
    keypoints: Hands<KeypointSet>,
    heatmaps: Hands<HeatmapStack>,
}

impl Snapshot {
    pub(crate) fn new(
        frame_id: u64,
        keypoints: Hands<KeypointSet>,
        heatmaps: Hands<HeatmapStack>,
    ) -> Self {
        Self {
            frame_id,
            keypoints,
            heatmaps,
        }
    }

    /// The snapshot published by initialization: every keypoint undetected, no heatmaps.
    pub(crate) fn empty(num_keypoints: usize) -> Self {
        Self::new(
            0,
            Hands::from_fn(|_| KeypointSet::undetected(num_keypoints)),
            Hands::default(),
        )
    }

    /// Returns the number of the frame this snapshot was produced by.
    ///
    /// Frame 0 is the empty snapshot published by initialization.
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn keypoints(&self) -> &Hands<KeypointSet> {
        &self.keypoints
    }

    /// Returns the exported heatmaps. Both stacks are empty unless heatmap export is enabled.
    #[inline]
    pub fn heatmaps(&self) -> &Hands<HeatmapStack> {
        &self.heatmaps
    }
}

type Slot = Arc<Mutex<Option<Arc<Snapshot>>>>;

/// Write side of the snapshot slot, held by the extractor.
#[derive(Debug, Default)]
pub(crate) struct Publisher {
    slot: Slot,
}

impl Publisher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replaces the published snapshot.
    pub(crate) fn publish(&self, snapshot: impl Into<Arc<Snapshot>>) {
        let snapshot = snapshot.into();
        let frame_id = snapshot.frame_id;
        let prev = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(snapshot);
        log::trace!(
            "published snapshot {frame_id} (replacing {:?})",
            prev.map(|s| s.frame_id)
        );
    }

    pub(crate) fn latest(&self) -> Option<Arc<Snapshot>> {
        load(&self.slot)
    }

    pub(crate) fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            slot: self.slot.clone(),
        }
    }
}

fn load(slot: &Slot) -> Option<Arc<Snapshot>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Read-only handle to the latest published [`Snapshot`].
///
/// Readers can be cloned and sent to any thread. They never block the extractor for longer than
/// it takes to clone an [`Arc`], and always observe a complete snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    slot: Slot,
}

impl SnapshotReader {
    /// Returns the latest snapshot.
    ///
    /// Fails with [`ExtractError::NotInitialized`] until the extractor has been initialized.
    pub fn latest(&self) -> Result<Arc<Snapshot>, ExtractError> {
        load(&self.slot).ok_or(ExtractError::NotInitialized)
    }

    /// Returns the keypoints of the latest snapshot.
    pub fn keypoints(&self) -> Result<Hands<KeypointSet>, ExtractError> {
        Ok(self.latest()?.keypoints.clone())
    }

    /// Returns the heatmaps of the latest snapshot.
    pub fn heatmaps(&self) -> Result<Hands<HeatmapStack>, ExtractError> {
        Ok(self.latest()?.heatmaps.clone())
    }
}
