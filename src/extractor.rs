//! The hand keypoint extraction pipeline.
//!
//! [`HandExtractor`] ties the pieces together: for every frame it takes an optional square crop
//! per hand, runs it through the [`MultiScaleAggregator`], decodes keypoints with the
//! [`KeypointDecoder`], and publishes the result as an immutable [`Snapshot`].
//!
//! The extractor belongs to the thread that initializes it. Only that thread may run extraction
//! or look at the device buffers; the published results can be read from anywhere through a
//! [`SnapshotReader`].

use std::sync::Arc;

use image::RgbImage;

use crate::affinity::{Affinity, ThreadToken};
use crate::aggregate::MultiScaleAggregator;
use crate::config::{ExtractorConfig, MissingHandPolicy};
use crate::decode::{KeypointDecoder, KeypointSet};
use crate::device::DeviceBuffers;
use crate::error::ExtractError;
use crate::hand::{HandSide, Hands};
use crate::heatmap::HeatmapStack;
use crate::nn::{tensor::Tensor, InferenceBackend};
use crate::scale::HeatmapScaler;
use crate::snapshot::{Publisher, Snapshot, SnapshotReader};
use crate::timer::StageTimers;

/// Lifecycle state of a [`HandExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    /// [`HandExtractor::initialize`] has not succeeded yet.
    Uninitialized,
    /// Initialized, no frame extracted yet.
    Ready,
    /// Results of the given frame are available. Frames are numbered from 1.
    ResultsAvailable(u64),
}

/// What happened to one hand during [`HandExtractor::extract`].
#[derive(Debug)]
pub enum SideOutcome {
    /// New keypoints (and heatmaps, if enabled) were published.
    Updated,
    /// No crop was supplied; the configured [`MissingHandPolicy`] was applied.
    Skipped,
    /// Extraction failed. The previous result of this hand was published again.
    Failed(ExtractError),
}

impl SideOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, SideOutcome::Updated)
    }
}

/// Per-hand outcome of one extracted frame.
#[derive(Debug)]
pub struct FrameReport {
    frame_id: u64,
    outcomes: Hands<SideOutcome>,
}

impl FrameReport {
    /// The number of the frame whose snapshot was published.
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn outcome(&self, side: HandSide) -> &SideOutcome {
        &self.outcomes[side]
    }

    #[inline]
    pub fn outcomes(&self) -> &Hands<SideOutcome> {
        &self.outcomes
    }

    /// Returns an iterator over all per-hand errors of the frame.
    pub fn errors(&self) -> impl Iterator<Item = (HandSide, &ExtractError)> + '_ {
        self.outcomes.iter().filter_map(|(side, outcome)| match outcome {
            SideOutcome::Failed(err) => Some((side, err)),
            _ => None,
        })
    }
}

/// State that only exists after initialization.
struct Runtime {
    affinity: Affinity,
    buffers: DeviceBuffers,
    latest: Arc<Snapshot>,
}

/// Extracts hand keypoints from hand crops.
pub struct HandExtractor<B: InferenceBackend> {
    config: ExtractorConfig,
    backend: B,
    aggregator: MultiScaleAggregator,
    decoder: KeypointDecoder,
    /// `Some` if heatmaps are exported.
    scaler: Option<HeatmapScaler>,
    runtime: Option<Runtime>,
    publisher: Publisher,
    timers: StageTimers,
}

impl<B: InferenceBackend> HandExtractor<B> {
    /// Creates an extractor from a configuration and an inference backend.
    ///
    /// Fails with [`ExtractError::Configuration`] if `config` is invalid. The extractor has to be
    /// [initialized][Self::initialize] before it can extract anything.
    pub fn new(config: ExtractorConfig, backend: B) -> Result<Self, ExtractError> {
        if let Err(err) = config.validate() {
            log::error!("rejecting hand extractor configuration: {err}");
            return Err(err.into());
        }

        let scaler = if config.exports_heatmaps() {
            log::info!(
                "only keypoint heatmaps are exported for hands, no background or PAFs (requested {:?})",
                config.heatmap_kinds
            );
            Some(HeatmapScaler::new(config.scale_mode())?)
        } else {
            None
        };

        Ok(Self {
            aggregator: MultiScaleAggregator::from_config(&config),
            decoder: KeypointDecoder::new(config.confidence_floor),
            scaler,
            config,
            backend,
            runtime: None,
            publisher: Publisher::new(),
            timers: StageTimers::new(),
        })
    }

    /// Initializes the extractor on the current thread.
    ///
    /// The calling thread becomes the owner of the extractor's device buffers. The backend is
    /// warmed up once with an all-black input, and an empty snapshot (every keypoint undetected)
    /// is published. If warm-up fails, the buffers acquired so far are released again and
    /// initialization may be retried.
    ///
    /// Calling this again on the owning thread does nothing. Calling it from another thread fails
    /// with [`ExtractError::CrossThreadAccess`].
    pub fn initialize(&mut self) -> Result<(), ExtractError> {
        if let Some(runtime) = &self.runtime {
            return runtime.affinity.check_current();
        }

        let affinity = Affinity::capture();
        let black = self.aggregator.black();
        let mut buffers = DeviceBuffers::acquire(self.aggregator.net_side(), black);
        if let Err(err) = self.backend.warm_up(buffers.staging()) {
            log::error!("hand extractor warm-up failed: {err:#}");
            return Err(ExtractError::Warmup(err));
        }
        buffers.clear_staging(black);

        let latest = Arc::new(Snapshot::empty(self.config.num_keypoints()));
        self.publisher.publish(latest.clone());
        log::debug!(
            "hand extractor initialized on thread {:?} ({} scales {:?}, {}x{} net)",
            affinity.owner(),
            self.aggregator.scales().len(),
            self.aggregator.scales(),
            self.aggregator.net_side(),
            self.aggregator.net_side(),
        );

        self.runtime = Some(Runtime {
            affinity,
            buffers,
            latest,
        });
        Ok(())
    }

    /// Extracts keypoints from one frame's hand crops and publishes the result.
    ///
    /// Crops must be square. A missing crop is handled according to the configured
    /// [`MissingHandPolicy`]. Failures that affect only one hand (backend errors, malformed crops)
    /// are reported in the returned [`FrameReport`] and leave that hand's previous result in place;
    /// a new snapshot is published regardless.
    ///
    /// Fails if the extractor is not initialized or is called from a thread other than the owner.
    pub fn extract(
        &mut self,
        crops: Hands<Option<&RgbImage>>,
    ) -> Result<FrameReport, ExtractError> {
        let Self {
            config,
            backend,
            aggregator,
            decoder,
            scaler,
            runtime,
            publisher,
            timers,
        } = self;
        let runtime = runtime.as_mut().ok_or(ExtractError::NotInitialized)?;
        runtime.affinity.check_current()?;

        let prev = &runtime.latest;
        let mut keypoints = prev.keypoints().clone();
        let mut heatmaps = prev.heatmaps().clone();
        let frame_id = prev.frame_id() + 1;

        let outcomes = Hands::from_fn(|side| {
            let Some(crop) = crops[side] else {
                if config.missing_hand_policy() == MissingHandPolicy::Clear {
                    keypoints[side] = KeypointSet::undetected(config.num_keypoints());
                    heatmaps[side] = HeatmapStack::new();
                }
                return SideOutcome::Skipped;
            };

            match aggregator.evaluate(&mut *backend, &mut runtime.buffers, side, crop, timers) {
                Ok(merged) => {
                    keypoints[side] =
                        timers.decode.time(|| decoder.decode(&merged, crop.width() as f32));
                    if let Some(scaler) = scaler.as_ref() {
                        heatmaps[side] = scaler.scale_stack(&merged);
                    }
                    SideOutcome::Updated
                }
                Err(err) => {
                    log::warn!("frame {frame_id}: {err}");
                    SideOutcome::Failed(err)
                }
            }
        });

        let snapshot = Arc::new(Snapshot::new(frame_id, keypoints, heatmaps));
        publisher.publish(snapshot.clone());
        runtime.latest = snapshot;

        log::debug!(
            "frame {frame_id}: left {:?}, right {:?}",
            outcomes.left(),
            outcomes.right()
        );
        Ok(FrameReport { frame_id, outcomes })
    }

    pub fn state(&self) -> ExtractorState {
        match &self.runtime {
            None => ExtractorState::Uninitialized,
            Some(rt) if rt.latest.frame_id() == 0 => ExtractorState::Ready,
            Some(rt) => ExtractorState::ResultsAvailable(rt.latest.frame_id()),
        }
    }

    /// Returns the keypoints of the latest frame.
    pub fn keypoints(&self) -> Result<Hands<KeypointSet>, ExtractError> {
        Ok(self.snapshot()?.keypoints().clone())
    }

    /// Returns the exported heatmaps of the latest frame.
    ///
    /// Both stacks are empty unless heatmap export was requested via
    /// [`ExtractorConfig::with_heatmaps`].
    pub fn heatmaps(&self) -> Result<Hands<HeatmapStack>, ExtractError> {
        Ok(self.snapshot()?.heatmaps().clone())
    }

    /// Returns the latest published snapshot.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, ExtractError> {
        self.publisher.latest().ok_or(ExtractError::NotInitialized)
    }

    /// Returns a handle that reads published snapshots from any thread.
    ///
    /// Readers can be created before initialization; they report
    /// [`ExtractError::NotInitialized`] until the first snapshot is published.
    pub fn reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    /// Returns the network input staged for the last evaluated crop and scale.
    ///
    /// Only the owning thread may call this.
    pub fn staged_input(&self) -> Result<&Tensor, ExtractError> {
        let runtime = self.privileged()?;
        Ok(runtime.buffers.staging())
    }

    /// Returns the raw backend output of the last evaluated scale of `side`, if any.
    ///
    /// Only the owning thread may call this.
    pub fn raw_output(&self, side: HandSide) -> Result<Option<&Tensor>, ExtractError> {
        let runtime = self.privileged()?;
        Ok(runtime.buffers.raw_output()[side].as_ref())
    }

    fn privileged(&self) -> Result<&Runtime, ExtractError> {
        let runtime = self.runtime.as_ref().ok_or(ExtractError::NotInitialized)?;
        runtime.affinity.check_current()?;
        Ok(runtime)
    }

    /// Returns the token of the thread that owns the device buffers, once initialized.
    pub fn owner(&self) -> Option<ThreadToken> {
        self.runtime.as_ref().map(|rt| rt.affinity.owner())
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Returns the profiling timers of the pipeline stages.
    pub fn timers(&self) -> &StageTimers {
        &self.timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeatmapKind;
    use crate::device::live;
    use crate::hand::HandLandmark;
    use crate::test::{blob_crop, FailingBackend, RedChannelBackend};

    fn extractor<B: InferenceBackend>(backend: B) -> HandExtractor<B> {
        HandExtractor::new(ExtractorConfig::square(32), backend).unwrap()
    }

    #[test]
    fn state_machine() {
        let mut ex = extractor(RedChannelBackend);
        assert_eq!(ex.state(), ExtractorState::Uninitialized);
        assert!(matches!(ex.keypoints(), Err(ExtractError::NotInitialized)));
        assert!(matches!(ex.staged_input(), Err(ExtractError::NotInitialized)));
        assert!(matches!(
            ex.extract(Hands::new(None, None)),
            Err(ExtractError::NotInitialized)
        ));

        ex.initialize().unwrap();
        assert_eq!(ex.state(), ExtractorState::Ready);
        let kps = ex.keypoints().unwrap();
        assert_eq!(kps[HandSide::Left].len(), HandLandmark::COUNT);

        let crop = blob_crop(32, 10.0, 12.0, 2.0);
        let report = ex.extract(Hands::new(Some(&crop), None)).unwrap();
        assert_eq!(report.frame_id(), 1);
        assert!(report.outcome(HandSide::Left).is_updated());
        assert!(matches!(report.outcome(HandSide::Right), SideOutcome::Skipped));
        assert_eq!(ex.state(), ExtractorState::ResultsAvailable(1));

        ex.initialize().unwrap();
        assert_eq!(ex.state(), ExtractorState::ResultsAvailable(1));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ExtractorConfig::square(32).with_scales(0, 0.0);
        assert!(matches!(
            HandExtractor::new(config, RedChannelBackend),
            Err(ExtractError::Configuration(_))
        ));
    }

    #[test]
    fn warmup_failure_leaves_extractor_uninitialized() {
        struct NoWarmup;
        impl InferenceBackend for NoWarmup {
            fn estimate(&mut self, _: &Tensor) -> anyhow::Result<Tensor> {
                anyhow::bail!("device lost")
            }
        }

        let mut ex = extractor(NoWarmup);
        assert!(matches!(ex.initialize(), Err(ExtractError::Warmup(_))));
        assert_eq!(ex.state(), ExtractorState::Uninitialized);
        assert!(ex.owner().is_none());
        assert_eq!(live::count(), 0);
    }

    #[test]
    fn warmup_sees_black_input() {
        /// Rejects every input that is not an all-black image.
        struct BlackOnly;
        impl InferenceBackend for BlackOnly {
            fn estimate(&mut self, input: &Tensor) -> anyhow::Result<Tensor> {
                if let Some(v) = input.as_raw_data().iter().find(|&&v| v != -0.5) {
                    anyhow::bail!("non-black input value {v}");
                }
                RedChannelBackend.estimate(input)
            }
        }

        let mut ex = extractor(BlackOnly);
        ex.initialize().unwrap();
        assert_eq!(ex.state(), ExtractorState::Ready);
        assert!(ex
            .staged_input()
            .unwrap()
            .as_raw_data()
            .iter()
            .all(|&v| v == -0.5));

        let black = RgbImage::new(32, 32);
        let report = ex.extract(Hands::new(Some(&black), None)).unwrap();
        assert!(report.outcome(HandSide::Left).is_updated());
    }

    #[test]
    fn retry_after_failed_warmup() {
        struct FlakyWarmup {
            attempts: u32,
        }
        impl InferenceBackend for FlakyWarmup {
            fn estimate(&mut self, input: &Tensor) -> anyhow::Result<Tensor> {
                RedChannelBackend.estimate(input)
            }

            fn warm_up(&mut self, _: &Tensor) -> anyhow::Result<()> {
                self.attempts += 1;
                if self.attempts == 1 {
                    anyhow::bail!("device busy");
                }
                Ok(())
            }
        }

        let mut ex = extractor(FlakyWarmup { attempts: 0 });
        assert!(matches!(ex.initialize(), Err(ExtractError::Warmup(_))));
        assert_eq!(live::count(), 0);

        ex.initialize().unwrap();
        assert_eq!(ex.state(), ExtractorState::Ready);
        assert_eq!(live::count(), 1);
        assert_eq!(ex.owner(), Some(ThreadToken::current()));

        drop(ex);
        assert_eq!(live::count(), 0);
    }

    #[test]
    fn foreign_owner_is_rejected() {
        let mut ex = extractor(RedChannelBackend);
        ex.initialize().unwrap();
        let foreign = ThreadToken::fresh();
        if let Some(runtime) = &mut ex.runtime {
            runtime.affinity = Affinity::with_owner(foreign);
        }

        let crop = blob_crop(32, 16.0, 16.0, 2.0);
        match ex.extract(Hands::new(Some(&crop), None)) {
            Err(ExtractError::CrossThreadAccess { owner, caller }) => {
                assert_eq!(owner, foreign);
                assert_eq!(caller, ThreadToken::current());
            }
            res => panic!("unexpected result {res:?}"),
        }
        assert!(matches!(
            ex.staged_input(),
            Err(ExtractError::CrossThreadAccess { .. })
        ));
        assert!(matches!(
            ex.initialize(),
            Err(ExtractError::CrossThreadAccess { .. })
        ));
        assert_eq!(ex.state(), ExtractorState::Ready);
        ex.keypoints().unwrap();
    }

    #[test]
    fn privileged_accessors_on_owner() {
        let mut ex = extractor(RedChannelBackend);
        ex.initialize().unwrap();
        assert_eq!(ex.staged_input().unwrap().shape(), &[1, 3, 32, 32]);
        assert!(ex.raw_output(HandSide::Left).unwrap().is_none());

        let crop = blob_crop(32, 16.0, 16.0, 2.0);
        ex.extract(Hands::new(Some(&crop), None)).unwrap();
        let raw = ex.raw_output(HandSide::Left).unwrap().unwrap();
        assert_eq!(raw.shape(), &[1, HandLandmark::COUNT, 32, 32]);
        assert!(ex.raw_output(HandSide::Right).unwrap().is_none());
    }

    #[test]
    fn failed_side_keeps_previous_result() {
        let mut ex = extractor(FailingBackend);
        ex.initialize().unwrap();
        let crop = blob_crop(32, 16.0, 16.0, 2.0);
        let report = ex.extract(Hands::new(Some(&crop), Some(&crop))).unwrap();
        assert_eq!(report.errors().count(), 2);
        assert!(report.errors().all(|(_, err)| err.is_transient()));
        assert_eq!(ex.state(), ExtractorState::ResultsAvailable(1));
        assert!(ex.keypoints().unwrap()[HandSide::Left]
            .iter()
            .all(|kp| !kp.is_detected()));
    }

    #[test]
    fn clear_policy_resets_missing_hands() {
        let config = ExtractorConfig::square(32)
            .with_missing_hand_policy(MissingHandPolicy::Clear)
            .with_heatmaps([HeatmapKind::Parts]);
        let mut ex = HandExtractor::new(config, RedChannelBackend).unwrap();
        ex.initialize().unwrap();

        let crop = blob_crop(32, 8.0, 20.0, 2.0);
        ex.extract(Hands::new(Some(&crop), None)).unwrap();
        assert!(ex.keypoints().unwrap()[HandSide::Left]
            .landmark(HandLandmark::Wrist)
            .unwrap()
            .is_detected());
        assert_eq!(ex.heatmaps().unwrap()[HandSide::Left].len(), 21);

        ex.extract(Hands::new(None, None)).unwrap();
        assert!(!ex.keypoints().unwrap()[HandSide::Left]
            .landmark(HandLandmark::Wrist)
            .unwrap()
            .is_detected());
        assert!(ex.heatmaps().unwrap()[HandSide::Left].is_empty());
    }
}
