use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{ClassificationError, Error, Result};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeMode {
    /// Scale both axes straight to the target size.
    Stretch,
    /// Scale so the shorter side fits, then cut the center.
    ShorterSideThenCenterCrop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Input layout a classifier expects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Preprocessing {
    pub width: u32,
    pub height: u32,
    pub resize: ResizeMode,
    /// Per-channel mean, applied after scaling to `[0, 1]`, in `channel_order`.
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub channel_order: ChannelOrder,
}

impl Preprocessing {
    /// Square input, shorter-side resize plus center crop, ImageNet statistics.
    pub fn imagenet(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            resize: ResizeMode::ShorterSideThenCenterCrop,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            channel_order: ChannelOrder::Rgb,
        }
    }

    /// Stretched input with values left in `[0, 1]`.
    pub fn unit(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resize: ResizeMode::Stretch,
            mean: [0.0; 3],
            std: [1.0; 3],
            channel_order: ChannelOrder::Rgb,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::config("classifier input size must be non-zero"));
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::config("classifier std must be positive"));
        }
        Ok(())
    }

    /// Resize, reorder and normalize a crop into an NCHW tensor.
    pub fn prepare(&self, crop: &RgbImage) -> Result<ClassifierInput, ClassificationError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(ClassificationError::InvalidRegion("empty crop".into()));
        }
        let resized = self.resize(crop);
        let plane = (self.width * self.height) as usize;
        let mut data = vec![0.0f32; plane * 3];

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let source = match self.channel_order {
                    ChannelOrder::Rgb => c,
                    ChannelOrder::Bgr => 2 - c,
                };
                let value = pixel.0[source] as f32 / 255.0;
                data[c * plane + i] = (value - self.mean[c]) / self.std[c];
            }
        }

        Ok(ClassifierInput {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn resize(&self, crop: &RgbImage) -> RgbImage {
        match self.resize {
            ResizeMode::Stretch => {
                imageops::resize(crop, self.width, self.height, FilterType::Triangle)
            }
            ResizeMode::ShorterSideThenCenterCrop => {
                let (cw, ch) = crop.dimensions();
                let scale = (self.width as f32 / cw as f32).max(self.height as f32 / ch as f32);
                let rw = ((cw as f32 * scale).round() as u32).max(self.width);
                let rh = ((ch as f32 * scale).round() as u32).max(self.height);
                let scaled = imageops::resize(crop, rw, rh, FilterType::Triangle);
                let x = (rw - self.width) / 2;
                let y = (rh - self.height) / 2;
                imageops::crop_imm(&scaled, x, y, self.width, self.height).to_image()
            }
        }
    }
}

/// Normalized `1 x 3 x height x width` tensor, channel-planar.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierInput {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ClassifierInput {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, channel: usize, y: u32, x: u32) -> f32 {
        let plane = (self.width * self.height) as usize;
        self.data[channel * plane + (y * self.width + x) as usize]
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn unit_preprocessing_scales_to_unit_range() {
        let crop = RgbImage::from_pixel(5, 3, Rgb([255, 0, 51]));
        let input = Preprocessing::unit(4, 4).prepare(&crop).expect("prepared");
        assert_eq!(input.as_slice().len(), 48);
        assert!((input.get(0, 1, 1) - 1.0).abs() < 1e-6);
        assert!(input.get(1, 1, 1).abs() < 1e-6);
        assert!((input.get(2, 1, 1) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn bgr_order_swaps_planes() {
        let crop = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let mut prep = Preprocessing::unit(2, 2);
        prep.channel_order = ChannelOrder::Bgr;
        let input = prep.prepare(&crop).expect("prepared");
        assert_eq!(input.get(0, 0, 0), 0.0);
        assert_eq!(input.get(2, 0, 0), 1.0);
    }

    #[test]
    fn center_crop_keeps_middle_of_long_side() {
        // Left third black, middle white, right third black.
        let crop = RgbImage::from_fn(30, 10, |x, _| {
            if (10..20).contains(&x) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let mut prep = Preprocessing::imagenet(10);
        prep.mean = [0.0; 3];
        prep.std = [1.0; 3];
        let input = prep.prepare(&crop).expect("prepared");
        assert_eq!(input.width(), 10);
        assert!(input.get(0, 5, 5) > 0.9);
    }

    #[test]
    fn imagenet_normalization_is_applied() {
        let crop = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        let input = Preprocessing::imagenet(4).prepare(&crop).expect("prepared");
        assert!((input.get(0, 0, 0) + IMAGENET_MEAN[0] / IMAGENET_STD[0]).abs() < 1e-5);
    }

    #[test]
    fn zero_std_is_rejected() {
        let mut prep = Preprocessing::unit(4, 4);
        prep.std = [1.0, 0.0, 1.0];
        assert!(prep.validate().is_err());
    }
}
