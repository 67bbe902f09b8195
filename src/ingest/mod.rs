//! Frame ingestion sources.
//!
//! This module provides the sources the pipeline pulls frames from:
//! - Synthetic scripted scenes (`stub://<scene>`), for tests and demos
//! - Local image-sequence directories (`file://<dir>` or a plain directory path)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source stamps frames with a monotonic stream timestamp measured from
//! the start of the stream. The pipeline's settle timer runs on these stamps
//! and never on the wall clock.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod sequence;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::path::Path;

use crate::error::{Error, Result};
use crate::frame::Frame;

pub use sequence::ImageSequenceSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A pull-based stream of frames.
pub trait FrameSource {
    /// Open the underlying device or stream. Failure is a `FrameAcquisition` error.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, `Ok(None)` at end of stream.
    ///
    /// `TransientFrame` errors mark a single unusable frame; the caller may
    /// keep pulling. `FrameAcquisition` errors end the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_rejected: u64,
    pub source: String,
}

/// Where and how to capture frames.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSettings {
    /// `stub://<scene>`, `file://<dir>`, a directory path, `v4l2://<device>`
    /// or a `/dev/video*` path.
    pub url: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://deposit".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Build the source named by `settings.url`. The source is not yet connected.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if let Some(scene) = url.strip_prefix("stub://") {
        let config = synthetic::SyntheticConfig::scene(scene, settings)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if let Some(device) = url.strip_prefix("v4l2://") {
        return open_v4l2(device, settings);
    }
    if url.starts_with("/dev/video") {
        return open_v4l2(url, settings);
    }
    let path = url.strip_prefix("file://").unwrap_or(url);
    if url.contains("://") && !url.starts_with("file://") {
        return Err(Error::config(format!("unsupported source url '{}'", url)));
    }
    let config = sequence::SequenceConfig {
        dir: Path::new(path).to_path_buf(),
        target_fps: settings.target_fps,
    };
    Ok(Box::new(ImageSequenceSource::new(config)))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(device: &str, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let config = v4l2::V4l2Config {
        device: device.to_string(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    };
    Ok(Box::new(V4l2Source::new(config)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(device: &str, _settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(Error::config(format!(
        "camera {} requires the ingest-v4l2 feature",
        device
    )))
}

/// Stream timestamp of frame `index` at `fps`.
pub(crate) fn frame_timestamp(index: u64, fps: u32) -> std::time::Duration {
    let fps = fps.max(1) as u64;
    std::time::Duration::from_micros(index.saturating_mul(1_000_000) / fps)
}
