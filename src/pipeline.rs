//! Per-stream deposit pipeline.
//!
//! `DepositPipeline` owns every piece of per-stream state: the previous
//! grayscale frame, the background model, the phase controller, confirmation
//! tracks and the deposit history. One frame is processed to completion before
//! the next is pulled:
//!
//! motion -> phase -> (settled) background diff -> confirmation
//!        -> (promoted) classification -> event

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use image::GrayImage;

use crate::background::{BackgroundDifferencer, ForegroundModel};
use crate::classify::{Classification, ClassificationHandoff};
use crate::config::PipelineConfig;
use crate::confirm::{ConfirmationFilter, DepositHistory};
use crate::error::{ClassificationError, Error, Result};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::motion::{MotionDetector, MotionReport};
use crate::phase::{PhaseController, PhaseState};
use crate::sink::EventSink;
use crate::{CandidateRegion, DepositEvent};

/// A registered deposit and, when classification failed, why it is `Unknown`.
#[derive(Debug)]
pub struct Deposit {
    pub event: DepositEvent,
    pub classification_error: Option<ClassificationError>,
}

/// What happened while processing one frame.
#[derive(Debug)]
pub struct CycleReport {
    pub sequence: u64,
    pub timestamp: Duration,
    /// The frame became the baseline; nothing else ran.
    pub baseline: bool,
    /// Phase after this cycle.
    pub phase: PhaseState,
    pub motion: MotionReport,
    pub diff_authorized: bool,
    pub candidates: Vec<CandidateRegion>,
    pub deposit: Option<Deposit>,
}

/// Counters for one `run`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub deposits: u64,
    pub classification_failures: u64,
    pub delivery_failures: u64,
}

pub struct DepositPipeline {
    config: PipelineConfig,
    motion: MotionDetector,
    phase: PhaseController,
    differencer: BackgroundDifferencer,
    confirmation: ConfirmationFilter,
    history: DepositHistory,
    handoff: ClassificationHandoff,
    background: Option<Box<dyn ForegroundModel>>,
    prev_gray: Option<GrayImage>,
}

impl DepositPipeline {
    pub fn new(config: PipelineConfig, handoff: ClassificationHandoff) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = &config.roi_dir {
            std::fs::create_dir_all(dir).map_err(|err| {
                Error::config(format!("cannot create roi dir {}: {}", dir.display(), err))
            })?;
        }
        Ok(Self {
            motion: MotionDetector::new(config.motion.clone(), config.min_contour_area)?,
            phase: PhaseController::new(config.settle_duration),
            differencer: BackgroundDifferencer::new(
                config.background.clone(),
                config.min_contour_area,
            ),
            confirmation: ConfirmationFilter::new(config.detection_required_frames),
            history: DepositHistory::new(),
            handoff,
            background: None,
            prev_gray: None,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn history(&self) -> &DepositHistory {
        &self.history
    }

    pub fn phase(&self) -> PhaseState {
        self.phase.state()
    }

    pub fn background(&self) -> Option<&dyn ForegroundModel> {
        self.background.as_deref()
    }

    /// Close any open deposit cycle and drop confirmation progress.
    /// The baseline, background model and history are kept.
    pub fn reset_session(&mut self) {
        self.phase.reset();
        self.confirmation.reset();
        log::info!("deposit session reset ({} deposits kept)", self.history.len());
    }

    /// Run one cycle on `frame`.
    ///
    /// A `TransientFrame` error leaves all state as it was, so the next frame
    /// is compared against the last good one.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<CycleReport> {
        let now = frame.timestamp();
        let gray = frame.gray();

        let Some(prev) = self.prev_gray.as_ref() else {
            self.background = Some(self.differencer.seed(gray)?);
            self.prev_gray = Some(gray.clone());
            log::info!(
                "baseline captured from frame {} ({}x{})",
                frame.sequence(),
                frame.width(),
                frame.height()
            );
            return Ok(CycleReport {
                sequence: frame.sequence(),
                timestamp: now,
                baseline: true,
                phase: self.phase.state(),
                motion: MotionReport::default(),
                diff_authorized: false,
                candidates: Vec::new(),
                deposit: None,
            });
        };

        let motion = self.motion.detect(gray, prev)?;
        if let Some(model) = &self.background {
            if model.dimensions() != gray.dimensions() {
                return Err(Error::transient("frame size differs from background model"));
            }
        }

        let decision = self.phase.observe(motion.motion_detected, now);
        if decision.reset_confirmation {
            self.confirmation.reset();
        }

        let mut candidates = Vec::new();
        let mut deposit = None;
        if decision.authorize_diff {
            let Some(model) = self.background.as_mut() else {
                return Err(Error::transient("background model is not seeded"));
            };
            candidates = self.differencer.diff(gray, now, model.as_mut())?;
            log::debug!(
                "frame {}: {} foreground candidate(s)",
                frame.sequence(),
                candidates.len()
            );
            if let Some(promoted) = self.confirmation.evaluate(&candidates, &mut self.history, now) {
                let keep_open = self.confirmation.has_pending();
                self.phase.deposit_confirmed(keep_open);
                deposit = Some(self.register(frame, &promoted));
            }
        }

        self.prev_gray = Some(gray.clone());
        Ok(CycleReport {
            sequence: frame.sequence(),
            timestamp: now,
            baseline: false,
            phase: self.phase.state(),
            motion,
            diff_authorized: decision.authorize_diff,
            candidates,
            deposit,
        })
    }

    /// Pull frames from `source` until end of stream or `stop` is set,
    /// delivering each deposit to `sink`.
    ///
    /// The source must already be connected. Transient frame errors are
    /// skipped and counted; delivery failures are logged and counted. A
    /// frame-acquisition failure ends the run with an error.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K, stop: &AtomicBool) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: EventSink + ?Sized,
    {
        let mut summary = RunSummary::default();
        while !stop.load(Ordering::SeqCst) {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("frame source exhausted");
                    break;
                }
                Err(err) if err.is_transient() => {
                    log::warn!("skipping frame: {}", err);
                    summary.frames_skipped += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let report = match self.process_frame(&frame) {
                Ok(report) => report,
                Err(err) if err.is_transient() => {
                    log::warn!("skipping frame {}: {}", frame.sequence(), err);
                    summary.frames_skipped += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            summary.frames_processed += 1;

            let Some(deposit) = report.deposit else {
                continue;
            };
            summary.deposits += 1;
            if deposit.classification_error.is_some() {
                summary.classification_failures += 1;
            }
            if let Err(err) = sink.deliver(&deposit.event) {
                let err = Error::Delivery(format!("{:#}", err));
                log::error!("deposit #{}: {}", deposit.event.deposit_id, err);
                summary.delivery_failures += 1;
            }
        }

        if let Err(err) = sink.flush() {
            log::error!("{}", Error::Delivery(format!("{:#}", err)));
            summary.delivery_failures += 1;
        }
        Ok(summary)
    }

    fn register(&mut self, frame: &Frame, promoted: &CandidateRegion) -> Deposit {
        let deposit_id = self.history.len() as u64;
        let (classification, classification_error) =
            match self.handoff.classify_region(frame, &promoted.bbox) {
                Ok(classification) => (classification, None),
                Err(err) => {
                    log::warn!("deposit #{}: classification failed: {}", deposit_id, err);
                    (Classification::unknown(), Some(err))
                }
            };

        let recorded_at_epoch_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if let Some(dir) = self.config.roi_dir.clone() {
            if let Err(err) = self.export_roi(&dir, frame, promoted, recorded_at_epoch_s, deposit_id) {
                log::warn!("deposit #{}: roi export failed: {:#}", deposit_id, err);
            }
        }

        let event = DepositEvent {
            deposit_id,
            bbox: promoted.bbox,
            area: promoted.area,
            label: classification.label,
            class_index: classification.class_index,
            confidence: classification.confidence,
            stream_time_ms: frame.timestamp().as_millis() as u64,
            recorded_at_epoch_s,
        };
        log::info!(
            "deposit #{} confirmed at {} ms: {} at ({}, {}, {}x{})",
            event.deposit_id,
            event.stream_time_ms,
            event.label,
            event.bbox.x,
            event.bbox.y,
            event.bbox.width,
            event.bbox.height
        );
        Deposit {
            event,
            classification_error,
        }
    }

    fn export_roi(
        &self,
        dir: &Path,
        frame: &Frame,
        promoted: &CandidateRegion,
        epoch_s: u64,
        deposit_id: u64,
    ) -> anyhow::Result<()> {
        let crop = self.handoff.crop(frame, &promoted.bbox)?;
        let path = dir.join(format!("deposit_roi_{}_{}.png", epoch_s, deposit_id));
        crop.save(&path)?;
        log::debug!("saved deposit crop to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{LabelTable, StubClassifier};
    use image::{Rgb, RgbImage};

    fn pipeline() -> DepositPipeline {
        let handoff = ClassificationHandoff::new(
            Box::new(StubClassifier::fixed(0)),
            LabelTable::from_categories(["Recyclable"]),
        )
        .expect("handoff");
        DepositPipeline::new(PipelineConfig::default(), handoff).expect("pipeline")
    }

    fn frame(seq: u64, width: u32, height: u32) -> Frame {
        Frame::new(
            seq,
            Duration::from_millis(seq * 100),
            RgbImage::from_pixel(width, height, Rgb([30, 30, 30])),
        )
        .expect("frame")
    }

    #[test]
    fn first_frame_is_baseline() -> Result<()> {
        let mut pipeline = pipeline();
        let report = pipeline.process_frame(&frame(0, 64, 64))?;
        assert!(report.baseline);
        assert_eq!(pipeline.background().map(|m| m.dimensions()), Some((64, 64)));

        let report = pipeline.process_frame(&frame(1, 64, 64))?;
        assert!(!report.baseline);
        assert!(!report.motion.motion_detected);
        assert_eq!(report.phase, PhaseState::Idle);
        Ok(())
    }

    #[test]
    fn size_change_is_skipped_without_losing_state() -> Result<()> {
        let mut pipeline = pipeline();
        pipeline.process_frame(&frame(0, 64, 64))?;
        let err = pipeline.process_frame(&frame(1, 32, 32)).unwrap_err();
        assert!(err.is_transient());
        assert!(!pipeline.process_frame(&frame(2, 64, 64))?.baseline);
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let handoff = ClassificationHandoff::new(
            Box::new(StubClassifier::fixed(0)),
            LabelTable::default(),
        )
        .expect("handoff");
        let config = PipelineConfig {
            detection_required_frames: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            DepositPipeline::new(config, handoff).err(),
            Some(Error::Configuration(_))
        ));
    }
}
