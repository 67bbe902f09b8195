//! V4L2 frame source.
//!
//! Captures from a local device node (e.g. `/dev/video0`) through memory-mapped
//! buffers. YUYV, MJPEG and RGB24 buffers are converted to RGB in-memory.
//! Frames are stamped with the time elapsed since `connect`.

use anyhow::Context;
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::error::{Error, Result};
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceState>,
    format: PixelFormat,
    frame_count: u64,
    frames_rejected: u64,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Yuyv,
            frame_count: 0,
            frames_rejected: 0,
            connected_at: None,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn open(&mut self) -> anyhow::Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).with_context(|| {
            format!(
                "v4l2 device {} delivers unsupported pixel format {}",
                self.config.device, format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        Ok(())
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        if let Err(err) = self.open() {
            self.last_error = Some(format!("{:#}", err));
            return Err(Error::acquisition(format!("{:#}", err)));
        }
        self.last_error = None;
        self.connected_at = Some(Instant::now());
        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let (Some(state), Some(connected_at)) = (self.state.as_mut(), self.connected_at) else {
            return Err(Error::acquisition("v4l2 device not connected"));
        };
        let pixels = match state.with_mut(|fields| fields.stream.next().map(|(buf, _)| buf.to_vec()))
        {
            Ok(pixels) => pixels,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(Error::acquisition(format!("capture v4l2 frame: {}", err)));
            }
        };
        let timestamp = connected_at.elapsed();

        let image = match normalize_to_rgb(&pixels, self.active_width, self.active_height, self.format)
        {
            Ok(image) => image,
            Err(err) => {
                self.frames_rejected += 1;
                return Err(err);
            }
        };
        let index = self.frame_count;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(index, timestamp, image).map(Some)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_rejected: self.frames_rejected,
            source: self.config.device.clone(),
        }
    }
}
