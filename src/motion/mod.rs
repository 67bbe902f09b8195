//! Motion detection between consecutive grayscale frames.
//!
//! Both frames are smoothed, a dense displacement field is estimated, and the
//! magnitude field is binarized against an adaptive threshold
//! `max(static_threshold, mean + 2·stddev)`. The threshold follows the scene's
//! noise floor, so sensor jitter under steady lighting does not read as motion.
//!
//! The field comes from a `FlowEstimator`: built-in block matching, or OpenCV
//! Farneback flow with the cv-opencv feature.

#[cfg(feature = "cv-opencv")]
pub(crate) mod farneback;
mod flow;

#[cfg(feature = "cv-opencv")]
pub use farneback::FarnebackFlow;
pub use flow::{mean_std, BlockMatcher, MotionField};

use image::{GrayImage, Luma};

use crate::config::{FlowMethod, MotionConfig};
use crate::error::{Error, Result};
use crate::regions::{clean_mask, external_blobs, Cleanup, MASK_ON};
use crate::BoundingBox;

/// Outcome of one motion check.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MotionReport {
    pub motion_detected: bool,
    /// Regions whose contour area exceeded the minimum, in scan order.
    pub regions: Vec<BoundingBox>,
    /// Threshold actually applied this cycle.
    pub threshold: f32,
    pub mean_magnitude: f32,
}

/// Dense displacement field between two equally sized grayscale frames.
pub trait FlowEstimator: Send {
    fn name(&self) -> &'static str;

    fn estimate(&mut self, previous: &GrayImage, current: &GrayImage) -> Result<MotionField>;
}

impl FlowEstimator for BlockMatcher {
    fn name(&self) -> &'static str {
        "block_matching"
    }

    fn estimate(&mut self, previous: &GrayImage, current: &GrayImage) -> Result<MotionField> {
        Ok(BlockMatcher::estimate(self, previous, current))
    }
}

/// Estimator selected by `config.method`.
pub fn estimator_for(config: &MotionConfig) -> Result<Box<dyn FlowEstimator>> {
    match config.method {
        FlowMethod::BlockMatching => Ok(Box::new(BlockMatcher::new(
            config.block_size,
            config.search_radius,
        ))),
        #[cfg(feature = "cv-opencv")]
        FlowMethod::Farneback => Ok(Box::new(FarnebackFlow::default())),
        #[cfg(not(feature = "cv-opencv"))]
        FlowMethod::Farneback => Err(Error::config(
            "farneback motion requires the cv-opencv feature",
        )),
    }
}

pub struct MotionDetector {
    config: MotionConfig,
    min_contour_area: f64,
    estimator: Box<dyn FlowEstimator>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig, min_contour_area: f64) -> Result<Self> {
        let estimator = estimator_for(&config)?;
        Ok(Self::with_estimator(config, min_contour_area, estimator))
    }

    pub fn with_estimator(
        config: MotionConfig,
        min_contour_area: f64,
        estimator: Box<dyn FlowEstimator>,
    ) -> Self {
        log::debug!("motion estimator: {}", estimator.name());
        Self {
            config,
            min_contour_area,
            estimator,
        }
    }

    /// Smoothed dense field between `previous` and `current`.
    pub fn estimate_field(&mut self, current: &GrayImage, previous: &GrayImage) -> Result<MotionField> {
        check_pair(current, previous)?;
        let prev = self.smooth(previous);
        let cur = self.smooth(current);
        self.estimator.estimate(&prev, &cur)
    }

    pub fn detect(&mut self, current: &GrayImage, previous: &GrayImage) -> Result<MotionReport> {
        let field = self.estimate_field(current, previous)?;
        let magnitudes = field.magnitudes();
        let (mean, std) = mean_std(&magnitudes);
        let threshold = self.config.threshold.max(mean + 2.0 * std);

        let (width, height) = current.dimensions();
        let mut mask = GrayImage::new(width, height);
        for (pixel, magnitude) in mask.pixels_mut().zip(&magnitudes) {
            if *magnitude > threshold {
                *pixel = Luma([MASK_ON]);
            }
        }
        let mask = clean_mask(&mask, Cleanup::CloseThenOpen);
        let regions: Vec<BoundingBox> = external_blobs(&mask, self.min_contour_area)
            .into_iter()
            .map(|blob| blob.bbox)
            .collect();

        Ok(MotionReport {
            motion_detected: !regions.is_empty(),
            regions,
            threshold,
            mean_magnitude: mean,
        })
    }

    fn smooth(&self, image: &GrayImage) -> GrayImage {
        if self.config.blur_sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(image, self.config.blur_sigma)
        } else {
            image.clone()
        }
    }
}

fn check_pair(current: &GrayImage, previous: &GrayImage) -> Result<()> {
    if current.width() == 0 || current.height() == 0 {
        return Err(Error::transient("current frame is empty"));
    }
    if current.dimensions() != previous.dimensions() {
        return Err(Error::transient(format!(
            "frame size changed from {:?} to {:?}",
            previous.dimensions(),
            current.dimensions()
        )));
    }
    Ok(())
}
