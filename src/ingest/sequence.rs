//! Local image-sequence source.
//!
//! Plays back a directory of still images (PNG or JPEG) in file-name order.
//! Timestamps are derived from `target_fps`, so a recorded capture replays with
//! the same settle timing it was recorded with.

use std::path::{Path, PathBuf};

use super::{frame_timestamp, FrameSource, SourceStats};
use crate::error::{Error, Result};
use crate::frame::Frame;

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Configuration for an image-sequence source.
#[derive(Clone, Debug)]
pub struct SequenceConfig {
    /// Local directory holding the frames.
    pub dir: PathBuf,
    /// Playback rate used to stamp frames.
    pub target_fps: u32,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            target_fps: 10,
        }
    }
}

pub struct ImageSequenceSource {
    config: SequenceConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frames_captured: u64,
    frames_rejected: u64,
    connected: bool,
}

impl ImageSequenceSource {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            cursor: 0,
            frames_captured: 0,
            frames_rejected: 0,
            connected: false,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn connect(&mut self) -> Result<()> {
        self.files = list_frames(&self.config.dir)?;
        if self.files.is_empty() {
            return Err(Error::acquisition(format!(
                "no image frames in {}",
                self.config.dir.display()
            )));
        }
        self.cursor = 0;
        self.connected = true;
        log::info!(
            "ImageSequenceSource: connected to {} ({} frames)",
            self.config.dir.display(),
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(Error::acquisition(
                "image sequence not connected; call connect() first",
            ));
        }
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let index = self.cursor as u64;
        self.cursor += 1;

        let image = match image::open(path) {
            Ok(image) => image.into_rgb8(),
            Err(err) => {
                self.frames_rejected += 1;
                return Err(Error::transient(format!(
                    "failed to decode {}: {}",
                    path.display(),
                    err
                )));
            }
        };
        self.frames_captured += 1;
        Frame::new(index, frame_timestamp(index, self.config.target_fps), image).map(Some)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            frames_rejected: self.frames_rejected,
            source: self.config.dir.display().to_string(),
        }
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        Error::acquisition(format!("cannot read frame dir {}: {}", dir.display(), err))
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| Error::acquisition(err.to_string()))?;
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)));
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn plays_frames_in_name_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::from_pixel(8, 8, Rgb([200, 200, 200])).save(dir.path().join("frame_002.png"))?;
        RgbImage::from_pixel(8, 8, Rgb([10, 10, 10])).save(dir.path().join("frame_001.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut source = ImageSequenceSource::new(SequenceConfig {
            dir: dir.path().to_path_buf(),
            target_fps: 5,
        });
        source.connect()?;
        assert_eq!(source.len(), 2);

        let first = source.next_frame()?.expect("first frame");
        assert_eq!(first.gray().get_pixel(0, 0).0[0], 10);
        let second = source.next_frame()?.expect("second frame");
        assert_eq!(second.timestamp(), std::time::Duration::from_millis(200));
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_transient() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("broken.png"), b"not a png")?;
        let mut source = ImageSequenceSource::new(SequenceConfig {
            dir: dir.path().to_path_buf(),
            target_fps: 10,
        });
        source.connect()?;
        let err = source.next_frame().unwrap_err();
        assert!(err.is_transient());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_rejected, 1);
        Ok(())
    }

    #[test]
    fn missing_dir_fails_acquisition() {
        let mut source = ImageSequenceSource::new(SequenceConfig {
            dir: PathBuf::from("/nonexistent/frames"),
            target_fps: 10,
        });
        assert!(matches!(source.connect(), Err(Error::FrameAcquisition(_))));
    }
}
