//! Scripted synthetic scenes (`stub://<scene>`).
//!
//! A scene is a flat background plus a list of drops. During a drop a
//! textured "hand" slides down toward a target over `hand_frames` frames and
//! then disappears; the drop's objects are visible from that frame on. Objects
//! are flat squares, so they read as foreground to the background model but
//! carry no motion of their own.
//!
//! Named scenes run for twenty seconds of stream time:
//! - `empty`: background only
//! - `deposit`: one object dropped near the center
//! - `pair`: two objects dropped together
//! - `revisit`: one deposit, then a hand passing over it without dropping
//! - `passthrough`: a hand passing through without dropping anything

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use image::{Rgb, RgbImage};

use super::{frame_timestamp, FrameSource, SourceSettings, SourceStats};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::BoundingBox;

const SCENE_SECONDS: u64 = 20;

/// A flat object that appears when its drop completes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticObject {
    pub bbox: BoundingBox,
    pub value: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticDrop {
    /// First frame the hand is visible.
    pub start_frame: u64,
    pub hand_frames: u64,
    /// Where the hand ends up. Defaults to the first object's origin.
    pub hand_target: Option<(u32, u32)>,
    pub objects: Vec<SyntheticObject>,
}

impl SyntheticDrop {
    fn target(&self) -> Option<(u32, u32)> {
        self.hand_target
            .or_else(|| self.objects.first().map(|o| (o.bbox.x, o.bbox.y)))
    }

    fn landed_at(&self) -> u64 {
        self.start_frame + self.hand_frames
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Stream ends after this many frames. `None` runs forever.
    pub total_frames: Option<u64>,
    pub background: u8,
    /// Uniform per-pixel noise amplitude. 0 disables.
    pub noise: u8,
    pub seed: u64,
    pub hand_size: u32,
    /// Hand displacement per frame, in pixels.
    pub hand_step: u32,
    pub drops: Vec<SyntheticDrop>,
}

impl SyntheticConfig {
    /// Background-only scene of the requested size.
    pub fn empty(width: u32, height: u32, target_fps: u32) -> Self {
        let side = width.min(height);
        Self {
            name: "empty".to_string(),
            width,
            height,
            target_fps,
            total_frames: None,
            background: 30,
            noise: 0,
            seed: 7,
            hand_size: (side / 8).max(4),
            hand_step: 6,
            drops: Vec::new(),
        }
    }

    pub fn with_drop(mut self, drop: SyntheticDrop) -> Self {
        self.drops.push(drop);
        self
    }

    pub fn with_total_frames(mut self, frames: u64) -> Self {
        self.total_frames = Some(frames);
        self
    }

    /// One of the named scenes, laid out for `settings`' frame size.
    pub fn scene(name: &str, settings: &SourceSettings) -> Result<Self> {
        let (w, h) = (settings.width, settings.height);
        if w < 32 || h < 32 {
            return Err(Error::config(format!(
                "synthetic scenes need at least 32x32 frames, got {}x{}",
                w, h
            )));
        }
        let mut config = Self::empty(w, h, settings.target_fps);
        config.name = name.to_string();
        config.total_frames = Some(SCENE_SECONDS * settings.target_fps.max(1) as u64);
        let side = (w.min(h) / 8).max(8);
        let fps = settings.target_fps.max(1) as u64;
        let start = fps;
        let hand_frames = 6;
        let object = |x: u32, y: u32, value: u8| SyntheticObject {
            bbox: BoundingBox::new(x, y, side, side),
            value,
        };
        let center = (w / 2 - side / 2, h / 2 - side / 2);

        match name {
            "empty" => {}
            "deposit" | "" => {
                config.drops.push(SyntheticDrop {
                    start_frame: start,
                    hand_frames,
                    hand_target: None,
                    objects: vec![object(center.0, center.1, 100)],
                });
            }
            "pair" => {
                config.drops.push(SyntheticDrop {
                    start_frame: start,
                    hand_frames,
                    hand_target: None,
                    objects: vec![
                        object(w / 4 - side / 2, center.1, 100),
                        object(3 * w / 4 - side / 2, center.1, 200),
                    ],
                });
            }
            "revisit" => {
                config.drops.push(SyntheticDrop {
                    start_frame: start,
                    hand_frames,
                    hand_target: None,
                    objects: vec![object(center.0, center.1, 100)],
                });
                config.drops.push(SyntheticDrop {
                    start_frame: start + 6 * fps,
                    hand_frames,
                    hand_target: Some(center),
                    objects: Vec::new(),
                });
            }
            "passthrough" => {
                config.drops.push(SyntheticDrop {
                    start_frame: start,
                    hand_frames,
                    hand_target: Some(center),
                    objects: Vec::new(),
                });
            }
            other => {
                return Err(Error::config(format!("unknown synthetic scene '{}'", other)));
            }
        }
        Ok(config)
    }
}

/// Synthetic frame source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            frame_count: 0,
            connected: false,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Render frame `index` of the scene.
    pub fn render(&mut self, index: u64) -> RgbImage {
        let cfg = &self.config;
        let bg = cfg.background;
        let mut image = RgbImage::from_pixel(cfg.width, cfg.height, Rgb([bg, bg, bg]));

        for drop in &cfg.drops {
            if index >= drop.landed_at() {
                for object in &drop.objects {
                    fill_rect(&mut image, object.bbox, object.value);
                }
            }
        }
        for drop in &cfg.drops {
            if index >= drop.start_frame && index < drop.landed_at() {
                if let Some(target) = drop.target() {
                    let remaining = drop.landed_at() - 1 - index;
                    let y = target.1 as i64 - (remaining * cfg.hand_step as u64) as i64;
                    draw_hand(&mut image, target.0 as i64, y, cfg.hand_size);
                }
            }
        }

        if cfg.noise > 0 {
            let amplitude = cfg.noise as i16;
            for value in image.iter_mut() {
                let jitter = self.rng.gen_range(-amplitude..=amplitude);
                *value = (*value as i16 + jitter).clamp(0, 255) as u8;
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to stub://{} ({}x{} @ {} fps)",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(Error::acquisition(
                "synthetic source not connected; call connect() first",
            ));
        }
        if let Some(total) = self.config.total_frames {
            if self.frame_count >= total {
                return Ok(None);
            }
        }
        let index = self.frame_count;
        let image = self.render(index);
        self.frame_count += 1;
        let timestamp = frame_timestamp(index, self.config.target_fps);
        Frame::new(index, timestamp, image).map(Some)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_rejected: 0,
            source: format!("stub://{}", self.config.name),
        }
    }
}

fn fill_rect(image: &mut RgbImage, bbox: BoundingBox, value: u8) {
    let Some(clamped) = bbox.clamp_to(image.width(), image.height()) else {
        return;
    };
    for y in clamped.y..clamped.y + clamped.height {
        for x in clamped.x..clamped.x + clamped.width {
            image.put_pixel(x, y, Rgb([value, value, value]));
        }
    }
}

/// Textured square with its top-left corner at `(x, y)`, clipped to the image.
/// The texture is anchored to the hand, so it moves with it.
fn draw_hand(image: &mut RgbImage, x: i64, y: i64, size: u32) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    for ly in 0..size as i64 {
        for lx in 0..size as i64 {
            let (px, py) = (x + lx, y + ly);
            if px < 0 || py < 0 || px >= w || py >= h {
                continue;
            }
            let v = 120 + ((lx * 37 + ly * 91 + (lx * ly) % 13) & 0x7f) as u8;
            image.put_pixel(px as u32, py as u32, Rgb([v, v.saturating_sub(20), v / 2]));
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
