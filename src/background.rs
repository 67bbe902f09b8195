//! Adaptive background subtraction.
//!
//! The model keeps a running mean and variance per pixel. It is seeded from the
//! baseline frame and only learns from frames the differencer is given, so a
//! hand moving through the scene never leaks into it. Objects that stay put
//! are absorbed over roughly `history` passes.

use image::{GrayImage, Luma};

use crate::config::{BackgroundConfig, BackgroundMethod};
use crate::error::{Error, Result};
use crate::regions::{clean_mask, external_blobs, Cleanup, MASK_ON};
use crate::CandidateRegion;
use std::time::Duration;

#[cfg(feature = "cv-opencv")]
pub use knn::KnnModel;

/// A learned background that labels foreground pixels.
pub trait ForegroundModel: Send {
    fn name(&self) -> &'static str;

    fn dimensions(&self) -> (u32, u32);

    /// Frames learned since seeding.
    fn passes(&self) -> u64;

    /// Classify every pixel of `frame` against the model, then learn from it.
    /// Returns the raw foreground mask.
    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage>;
}

/// Per-pixel running Gaussian.
#[derive(Clone, Debug)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    learning_rate: f32,
    dist2_threshold: f32,
    var_threshold: f32,
    passes: u64,
}

impl BackgroundModel {
    pub fn seeded(baseline: &GrayImage, config: &BackgroundConfig) -> Self {
        let (width, height) = baseline.dimensions();
        Self {
            width,
            height,
            mean: baseline.as_raw().iter().map(|v| *v as f32).collect(),
            variance: vec![0.0; baseline.as_raw().len()],
            learning_rate: 1.0 / config.history.max(1) as f32,
            dist2_threshold: config.dist2_threshold,
            var_threshold: config.var_threshold,
            passes: 0,
        }
    }

    pub fn mean_at(&self, x: u32, y: u32) -> f32 {
        self.mean[y as usize * self.width as usize + x as usize]
    }

    pub fn variance_at(&self, x: u32, y: u32) -> f32 {
        self.variance[y as usize * self.width as usize + x as usize]
    }
}

impl ForegroundModel for BackgroundModel {
    fn name(&self) -> &'static str {
        "running_gaussian"
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn passes(&self) -> u64 {
        self.passes
    }

    fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage> {
        check_size(frame, (self.width, self.height))?;

        let lr = self.learning_rate;
        let (dist2_threshold, var_threshold) = (self.dist2_threshold, self.var_threshold);
        let mut mask = GrayImage::new(self.width, self.height);
        for ((out, value), (mean, var)) in mask
            .pixels_mut()
            .zip(frame.as_raw())
            .zip(self.mean.iter_mut().zip(self.variance.iter_mut()))
        {
            let diff = *value as f32 - *mean;
            let d2 = diff * diff;
            if d2 > dist2_threshold.max(var_threshold * *var) {
                *out = Luma([MASK_ON]);
            }
            *mean += lr * diff;
            *var += lr * (d2 - *var);
        }
        self.passes += 1;
        Ok(mask)
    }
}

fn check_size(frame: &GrayImage, model: (u32, u32)) -> Result<()> {
    if frame.dimensions() != model {
        return Err(Error::transient(format!(
            "frame size {:?} does not match background model {:?}",
            frame.dimensions(),
            model
        )));
    }
    Ok(())
}

#[cfg(feature = "cv-opencv")]
mod knn {
    use image::GrayImage;
    use opencv::core::{Mat, Ptr};
    use opencv::prelude::*;
    use opencv::video::{create_background_subtractor_knn, BackgroundSubtractorKNN};

    use super::{check_size, ForegroundModel};
    use crate::config::BackgroundConfig;
    use crate::error::{Error, Result};
    use crate::motion::farneback::{cv_error, to_mat};
    use crate::regions::MASK_ON;

    /// Confident foreground in the subtractor's mask.
    const FOREGROUND_LEVEL: u8 = 200;

    /// OpenCV KNN background subtractor.
    pub struct KnnModel {
        subtractor: Ptr<dyn BackgroundSubtractorKNN>,
        width: u32,
        height: u32,
        passes: u64,
    }

    // SAFETY: the subtractor is owned by one model and never shared.
    unsafe impl Send for KnnModel {}

    impl KnnModel {
        pub fn seeded(baseline: &GrayImage, config: &BackgroundConfig) -> Result<Self> {
            let mut subtractor = create_background_subtractor_knn(
                config.history as i32,
                config.dist2_threshold as f64,
                false,
            )
            .map_err(cv_error)?;
            let mut mask = Mat::default();
            opencv::video::BackgroundSubtractor::apply(
                subtractor.as_mut(),
                &to_mat(baseline)?,
                &mut mask,
                1.0,
            )
            .map_err(cv_error)?;
            let (width, height) = baseline.dimensions();
            Ok(Self {
                subtractor,
                width,
                height,
                passes: 0,
            })
        }
    }

    impl ForegroundModel for KnnModel {
        fn name(&self) -> &'static str {
            "knn"
        }

        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn passes(&self) -> u64 {
            self.passes
        }

        fn apply(&mut self, frame: &GrayImage) -> Result<GrayImage> {
            check_size(frame, (self.width, self.height))?;
            let mut mask = Mat::default();
            opencv::video::BackgroundSubtractor::apply(
                self.subtractor.as_mut(),
                &to_mat(frame)?,
                &mut mask,
                -1.0,
            )
            .map_err(cv_error)?;
            let bytes = mask.data_bytes().map_err(cv_error)?;
            let binary = bytes
                .iter()
                .map(|v| if *v >= FOREGROUND_LEVEL { MASK_ON } else { 0 })
                .collect();
            self.passes += 1;
            GrayImage::from_raw(self.width, self.height, binary)
                .ok_or_else(|| Error::transient("foreground mask size mismatch"))
        }
    }
}

/// Model selected by `config.method`, seeded from `baseline`.
pub fn seed_model(baseline: &GrayImage, config: &BackgroundConfig) -> Result<Box<dyn ForegroundModel>> {
    match config.method {
        BackgroundMethod::RunningGaussian => Ok(Box::new(BackgroundModel::seeded(baseline, config))),
        #[cfg(feature = "cv-opencv")]
        BackgroundMethod::Knn => Ok(Box::new(KnnModel::seeded(baseline, config)?)),
        #[cfg(not(feature = "cv-opencv"))]
        BackgroundMethod::Knn => Err(Error::config(
            "knn background requires the cv-opencv feature",
        )),
    }
}

pub struct BackgroundDifferencer {
    config: BackgroundConfig,
    min_contour_area: f64,
}

impl BackgroundDifferencer {
    pub fn new(config: BackgroundConfig, min_contour_area: f64) -> Self {
        Self {
            config,
            min_contour_area,
        }
    }

    pub fn seed(&self, baseline: &GrayImage) -> Result<Box<dyn ForegroundModel>> {
        let model = seed_model(baseline, &self.config)?;
        log::debug!("background model: {}", model.name());
        Ok(model)
    }

    /// Foreground candidates in contour-scan order.
    pub fn diff(
        &self,
        frame: &GrayImage,
        timestamp: Duration,
        model: &mut dyn ForegroundModel,
    ) -> Result<Vec<CandidateRegion>> {
        let raw = model.apply(frame)?;
        let mask = clean_mask(&raw, Cleanup::OpenThenClose);
        Ok(external_blobs(&mask, self.min_contour_area)
            .into_iter()
            .map(|blob| CandidateRegion {
                bbox: blob.bbox,
                area: blob.area,
                timestamp,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn scene(objects: &[(u32, u32, u8)]) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            for &(ox, oy, value) in objects {
                if x >= ox && x < ox + 12 && y >= oy && y < oy + 12 {
                    return Luma([value]);
                }
            }
            Luma([30])
        })
    }

    fn differencer() -> BackgroundDifferencer {
        BackgroundDifferencer::new(BackgroundConfig::default(), 40.0)
    }

    #[test]
    fn unchanged_scene_has_no_candidates() -> Result<()> {
        let baseline = scene(&[]);
        let diff = differencer();
        let mut model = diff.seed(&baseline)?;
        let found = diff.diff(&baseline, Duration::ZERO, model.as_mut())?;
        assert!(found.is_empty());
        assert_eq!(model.passes(), 1);
        Ok(())
    }

    #[test]
    fn new_object_becomes_candidate() -> Result<()> {
        let baseline = scene(&[]);
        let diff = differencer();
        let mut model = diff.seed(&baseline)?;
        let found = diff.diff(&scene(&[(20, 24, 100)]), Duration::from_millis(700), model.as_mut())?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, BoundingBox::new(20, 24, 12, 12));
        assert_eq!(found[0].timestamp, Duration::from_millis(700));
        Ok(())
    }

    #[test]
    fn small_intensity_change_is_background() -> Result<()> {
        let baseline = scene(&[]);
        let diff = differencer();
        let mut model = diff.seed(&baseline)?;
        // 15 levels: 225 < dist2 threshold of 400.
        assert!(diff.diff(&scene(&[(20, 24, 45)]), Duration::ZERO, model.as_mut())?.is_empty());
        Ok(())
    }

    #[test]
    fn model_learns_toward_observed_values() -> Result<()> {
        let baseline = scene(&[]);
        let config = BackgroundConfig {
            history: 10,
            ..BackgroundConfig::default()
        };
        let mut model = BackgroundModel::seeded(&baseline, &config);
        model.apply(&scene(&[(0, 0, 130)]))?;
        assert!((model.mean_at(5, 5) - 40.0).abs() < 1e-4);
        assert!((model.variance_at(5, 5) - 1000.0).abs() < 1e-2);
        assert_eq!(model.mean_at(40, 40), 30.0);
        Ok(())
    }

    #[test]
    fn size_mismatch_is_transient() {
        let diff = differencer();
        let mut model = diff.seed(&GrayImage::new(64, 64)).expect("seed");
        let err = diff
            .diff(&GrayImage::new(32, 32), Duration::ZERO, model.as_mut())
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn default_method_is_running_gaussian() -> Result<()> {
        let model = seed_model(&scene(&[]), &BackgroundConfig::default())?;
        assert_eq!(model.name(), "running_gaussian");
        assert_eq!(model.dimensions(), (64, 64));
        assert_eq!(model.passes(), 0);
        Ok(())
    }
}
