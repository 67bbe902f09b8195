//! Frame container.
//!
//! - `Frame`: one captured image with its sequence number and stream timestamp.
//!   Holds the RGB pixels and the grayscale derivative used by motion and
//!   background analysis.
//!
//! Frames are owned transiently by the pipeline. Only the previous grayscale
//! image outlives a cycle, and only for the one-step motion comparison.

use image::{imageops, GrayImage, RgbImage};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::BoundingBox;

/// Captured frame. Construct through `Frame::new` or `Frame::from_rgb_bytes`,
/// both of which reject empty images.
#[derive(Clone, Debug)]
pub struct Frame {
    sequence: u64,
    timestamp: Duration,
    color: RgbImage,
    gray: GrayImage,
}

impl Frame {
    pub fn new(sequence: u64, timestamp: Duration, color: RgbImage) -> Result<Self> {
        if color.width() == 0 || color.height() == 0 {
            return Err(Error::transient(format!(
                "frame {} is empty ({}x{})",
                sequence,
                color.width(),
                color.height()
            )));
        }
        let gray = imageops::grayscale(&color);
        Ok(Self {
            sequence,
            timestamp,
            color,
            gray,
        })
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb_bytes(
        sequence: u64,
        timestamp: Duration,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| Error::transient("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(Error::transient(format!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            )));
        }
        let color = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| Error::transient("RGB buffer does not match dimensions"))?;
        Self::new(sequence, timestamp, color)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Monotonic time since the source started.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }

    pub fn color(&self) -> &RgbImage {
        &self.color
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Copy the region out of the color image, clamped to the frame.
    ///
    /// Returns `None` when the clamped region is empty.
    pub fn crop(&self, region: &BoundingBox) -> Option<RgbImage> {
        let clamped = region.clamp_to(self.width(), self.height())?;
        Some(
            imageops::crop_imm(
                &self.color,
                clamped.x,
                clamped.y,
                clamped.width,
                clamped.height,
            )
            .to_image(),
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
