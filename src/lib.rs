//! Deposit Kernel
//!
//! This crate implements the event-detection core of a smart waste receptacle:
//! it watches a continuous frame stream, decides when an object has been
//! deposited (as opposed to a hand or arm passing through), isolates the
//! deposited object's region and hands it to a classifier.
//!
//! # Architecture
//!
//! One frame is fully processed before the next is pulled:
//!
//! 1. **Frame source** (`ingest`): pulls frames; the first becomes the baseline.
//! 2. **Motion detector** (`motion`): dense displacement field, adaptive threshold.
//! 3. **Phase controller** (`phase`): `Idle` / `MotionActive` / `Settling`,
//!    gates background analysis until the scene is quiet.
//! 4. **Background differencer** (`background`): adaptive per-pixel model,
//!    foreground candidate regions.
//! 5. **Confirmation filter** (`confirm`): collision suppression against the
//!    deposit history plus N-frame persistence.
//! 6. **Classification handoff** (`classify`): crop, normalize, classify, label.
//! 7. **Event emitter** (`sink`): `DepositEvent` delivered to a caller sink.
//!
//! `pipeline::DepositPipeline` owns the per-frame cycle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod background;
pub mod classify;
pub mod config;
pub mod confirm;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod phase;
pub mod pipeline;
pub mod regions;
pub mod sink;

pub use background::{BackgroundDifferencer, BackgroundModel, ForegroundModel};
pub use classify::{
    Classification, ClassificationHandoff, Classifier, ClassifierInput, LabelTable, Prediction,
    Preprocessing, StubClassifier, UNKNOWN_LABEL,
};
pub use config::{BackgroundConfig, BackgroundMethod, FlowMethod, MotionConfig, PipelineConfig};
pub use confirm::{ConfirmationFilter, DepositHistory};
pub use error::{ClassificationError, Error, Result};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceSettings, SourceStats};
pub use ingest::{sequence::SequenceConfig, ImageSequenceSource};
pub use ingest::{synthetic::SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{v4l2::V4l2Config, V4l2Source};
pub use motion::{BlockMatcher, FlowEstimator, MotionDetector, MotionField, MotionReport};
pub use phase::{PhaseController, PhaseDecision, PhaseState};
pub use pipeline::{CycleReport, Deposit, DepositPipeline, RunSummary};
#[cfg(feature = "sink-http")]
pub use sink::HttpSink;
pub use sink::{EventSink, FanoutSink, JsonLinesSink, LogSink};

// -------------------- Regions --------------------

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Approximate collision used for deduplication.
    ///
    /// `self` collides with `other` iff `|other.x - self.x| < self.width` and
    /// `|other.y - self.y| < self.height`. This compares origins against this
    /// box's own extent, so it is neither symmetric nor a true intersection test.
    pub fn collides_with(&self, other: &BoundingBox) -> bool {
        let dx = (other.x as i64 - self.x as i64).abs();
        let dy = (other.y as i64 - self.y as i64).abs();
        dx < self.width as i64 && dy < self.height as i64
    }

    /// Exact rectangle intersection.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        let x_end = self.x as u64 + self.width as u64;
        let y_end = self.y as u64 + self.height as u64;
        let other_x_end = other.x as u64 + other.width as u64;
        let other_y_end = other.y as u64 + other.height as u64;
        (self.x as u64) < other_x_end
            && (other.x as u64) < x_end
            && (self.y as u64) < other_y_end
            && (other.y as u64) < y_end
    }

    /// Clip to a `width x height` image. `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if self.x >= width || self.y >= height || self.width == 0 || self.height == 0 {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        Some(BoundingBox::new(self.x, self.y, w, h))
    }
}

/// Foreground region produced by the background differencer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateRegion {
    pub bbox: BoundingBox,
    /// Contour area in px².
    pub area: f64,
    /// Stream timestamp of the frame the region was found in.
    pub timestamp: Duration,
}

// -------------------- Deposits --------------------

/// A confirmed deposit. Kept for the session to suppress re-registration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepositRecord {
    pub bbox: BoundingBox,
    pub registered_at: Duration,
}

/// Terminal artifact handed to external consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// 1-based deposit number within the session.
    pub deposit_id: u64,
    pub bbox: BoundingBox,
    pub area: f64,
    pub label: String,
    pub class_index: Option<usize>,
    pub confidence: Option<f32>,
    /// Stream time of the confirming frame, in milliseconds.
    pub stream_time_ms: u64,
    /// Wall-clock registration time, seconds since the Unix epoch.
    pub recorded_at_epoch_s: u64,
}
