use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::LabelTable;
use crate::error::{Error, Result};
use crate::ingest::SourceSettings;

const DEFAULT_MOTION_THRESHOLD: f32 = 5.0;
const DEFAULT_BLUR_SIGMA: f32 = 1.1;
const DEFAULT_BLOCK_SIZE: u32 = 8;
const DEFAULT_SEARCH_RADIUS: u32 = 6;
const DEFAULT_MIN_CONTOUR_AREA: f64 = 500.0;
const DEFAULT_SETTLE_SECS: f64 = 1.0;
const DEFAULT_REQUIRED_FRAMES: u32 = 3;
const DEFAULT_BG_HISTORY: u32 = 500;
const DEFAULT_BG_DIST2_THRESHOLD: f32 = 400.0;
const DEFAULT_BG_VAR_THRESHOLD: f32 = 16.0;
const DEFAULT_CLASSIFIER_INPUT: u32 = 384;

// ----------------------------------------------------------------------------
// Pipeline configuration
// ----------------------------------------------------------------------------

/// Dense displacement estimator used by the motion detector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMethod {
    /// Built-in block matching with a per-frame noise floor.
    #[default]
    BlockMatching,
    /// OpenCV Farneback polynomial-expansion flow (feature: cv-opencv).
    Farneback,
}

impl FlowMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowMethod::BlockMatching => "block_matching",
            FlowMethod::Farneback => "farneback",
        }
    }
}

/// Per-pixel background model used by the differencer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMethod {
    /// Built-in running mean and variance per pixel.
    #[default]
    RunningGaussian,
    /// OpenCV KNN background subtractor (feature: cv-opencv).
    Knn,
}

impl BackgroundMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundMethod::RunningGaussian => "running_gaussian",
            BackgroundMethod::Knn => "knn",
        }
    }
}

/// Dense-flow motion detector settings.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionConfig {
    pub method: FlowMethod,
    /// Static floor of the adaptive magnitude threshold, in pixels.
    pub threshold: f32,
    /// Gaussian sigma applied to both frames before matching. 0 disables.
    pub blur_sigma: f32,
    /// Side of the matching block, in pixels.
    pub block_size: u32,
    /// Largest displacement searched along each axis, in pixels.
    pub search_radius: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            method: FlowMethod::default(),
            threshold: DEFAULT_MOTION_THRESHOLD,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            block_size: DEFAULT_BLOCK_SIZE,
            search_radius: DEFAULT_SEARCH_RADIUS,
        }
    }
}

/// Background model settings.
#[derive(Clone, Debug, PartialEq)]
pub struct BackgroundConfig {
    pub method: BackgroundMethod,
    /// Effective history window. The learning rate is `1 / history`.
    pub history: u32,
    /// Squared intensity distance above which a pixel is foreground.
    pub dist2_threshold: f32,
    /// Multiple of the per-pixel variance that also has to be exceeded.
    pub var_threshold: f32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            method: BackgroundMethod::default(),
            history: DEFAULT_BG_HISTORY,
            dist2_threshold: DEFAULT_BG_DIST2_THRESHOLD,
            var_threshold: DEFAULT_BG_VAR_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub motion: MotionConfig,
    /// Contours must enclose strictly more than this area (px²).
    pub min_contour_area: f64,
    /// Quiet interval after the last motion before differencing is trusted.
    pub settle_duration: Duration,
    /// Consecutive qualifying cycles before a region is promoted.
    pub detection_required_frames: u32,
    pub background: BackgroundConfig,
    /// When set, each confirmed crop is written here as PNG.
    pub roi_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            min_contour_area: DEFAULT_MIN_CONTOUR_AREA,
            settle_duration: Duration::from_secs_f64(DEFAULT_SETTLE_SECS),
            detection_required_frames: DEFAULT_REQUIRED_FRAMES,
            background: BackgroundConfig::default(),
            roi_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Reject thresholds the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let motion = &self.motion;
        if !motion.threshold.is_finite() || motion.threshold <= 0.0 {
            return Err(Error::config("motion threshold must be a positive number"));
        }
        if !motion.blur_sigma.is_finite() || motion.blur_sigma < 0.0 {
            return Err(Error::config("motion blur sigma must be >= 0"));
        }
        if motion.block_size < 2 {
            return Err(Error::config("motion block size must be >= 2"));
        }
        if motion.search_radius == 0 {
            return Err(Error::config("motion search radius must be >= 1"));
        }
        let max_magnitude = motion.search_radius as f32 * std::f32::consts::SQRT_2;
        if motion.method == FlowMethod::BlockMatching && motion.threshold >= max_magnitude {
            return Err(Error::config(format!(
                "motion threshold {} can never be exceeded with search radius {}",
                motion.threshold, motion.search_radius
            )));
        }
        if !cfg!(feature = "cv-opencv") {
            if motion.method != FlowMethod::BlockMatching {
                return Err(Error::config(format!(
                    "motion method {} requires the cv-opencv feature",
                    motion.method.as_str()
                )));
            }
            if self.background.method != BackgroundMethod::RunningGaussian {
                return Err(Error::config(format!(
                    "background method {} requires the cv-opencv feature",
                    self.background.method.as_str()
                )));
            }
        }
        if !self.min_contour_area.is_finite() || self.min_contour_area < 0.0 {
            return Err(Error::config("min contour area must be >= 0"));
        }
        if self.detection_required_frames == 0 {
            return Err(Error::config("detection required frames must be >= 1"));
        }
        let bg = &self.background;
        if bg.history == 0 {
            return Err(Error::config("background history must be >= 1"));
        }
        if !bg.dist2_threshold.is_finite() || bg.dist2_threshold <= 0.0 {
            return Err(Error::config("background dist2 threshold must be > 0"));
        }
        if !bg.var_threshold.is_finite() || bg.var_threshold < 0.0 {
            return Err(Error::config("background variance threshold must be >= 0"));
        }
        Ok(())
    }
}

pub(crate) fn settle_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::config(format!("settle duration {} s is not valid", secs)))
}

// ----------------------------------------------------------------------------
// depositd configuration (file + environment)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct DepositdConfigFile {
    source: Option<SourceConfigFile>,
    motion: Option<MotionConfigFile>,
    min_contour_area: Option<f64>,
    settle_duration_secs: Option<f64>,
    detection_required_frames: Option<u32>,
    background: Option<BackgroundConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    method: Option<FlowMethod>,
    threshold: Option<f32>,
    blur_sigma: Option<f32>,
    block_size: Option<u32>,
    search_radius: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackgroundConfigFile {
    method: Option<BackgroundMethod>,
    history: Option<u32>,
    dist2_threshold: Option<f32>,
    var_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    categories: Option<Vec<String>>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    events_path: Option<PathBuf>,
    roi_dir: Option<PathBuf>,
    http_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// ONNX model file. Without one, every deposit is labeled `Unknown`.
    pub model_path: Option<PathBuf>,
    /// Label file, one label per line, or a dataset directory of class folders.
    pub labels_path: Option<PathBuf>,
    /// Inline label list, used when `labels_path` is unset.
    pub categories: Vec<String>,
    /// Square model input side.
    pub input_size: u32,
}

impl ClassifierSettings {
    /// Label table from `labels_path`, else from `categories`.
    pub fn label_table(&self) -> anyhow::Result<LabelTable> {
        match &self.labels_path {
            Some(path) => LabelTable::load(path),
            None => Ok(LabelTable::from_categories(self.categories.iter().cloned())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputSettings {
    /// Append events as JSON lines here.
    pub events_path: Option<PathBuf>,
    /// POST events as JSON here (requires the sink-http feature).
    pub http_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DepositdConfig {
    pub source: SourceSettings,
    pub pipeline: PipelineConfig,
    pub classifier: ClassifierSettings,
    pub output: OutputSettings,
}

impl DepositdConfig {
    /// Load from the file named by `DEPOSIT_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = non_empty_env("DEPOSIT_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DepositdConfigFile) -> anyhow::Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let defaults = SourceSettings::default();
        let source = SourceSettings {
            url: source_file.url.unwrap_or(defaults.url),
            target_fps: source_file.target_fps.unwrap_or(defaults.target_fps),
            width: source_file.width.unwrap_or(defaults.width),
            height: source_file.height.unwrap_or(defaults.height),
        };

        let motion_file = file.motion.unwrap_or_default();
        let motion_defaults = MotionConfig::default();
        let motion = MotionConfig {
            method: motion_file.method.unwrap_or(motion_defaults.method),
            threshold: motion_file.threshold.unwrap_or(motion_defaults.threshold),
            blur_sigma: motion_file.blur_sigma.unwrap_or(motion_defaults.blur_sigma),
            block_size: motion_file.block_size.unwrap_or(motion_defaults.block_size),
            search_radius: motion_file
                .search_radius
                .unwrap_or(motion_defaults.search_radius),
        };

        let bg_file = file.background.unwrap_or_default();
        let bg_defaults = BackgroundConfig::default();
        let background = BackgroundConfig {
            method: bg_file.method.unwrap_or(bg_defaults.method),
            history: bg_file.history.unwrap_or(bg_defaults.history),
            dist2_threshold: bg_file
                .dist2_threshold
                .unwrap_or(bg_defaults.dist2_threshold),
            var_threshold: bg_file.var_threshold.unwrap_or(bg_defaults.var_threshold),
        };

        let output_file = file.output.unwrap_or_default();
        let settle_duration = settle_from_secs(
            file.settle_duration_secs.unwrap_or(DEFAULT_SETTLE_SECS),
        )?;
        let pipeline = PipelineConfig {
            motion,
            min_contour_area: file.min_contour_area.unwrap_or(DEFAULT_MIN_CONTOUR_AREA),
            settle_duration,
            detection_required_frames: file
                .detection_required_frames
                .unwrap_or(DEFAULT_REQUIRED_FRAMES),
            background,
            roi_dir: output_file.roi_dir,
        };

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier = ClassifierSettings {
            model_path: classifier_file.model_path,
            labels_path: classifier_file.labels_path,
            categories: classifier_file.categories.unwrap_or_default(),
            input_size: classifier_file
                .input_size
                .unwrap_or(DEFAULT_CLASSIFIER_INPUT),
        };

        let output = OutputSettings {
            events_path: output_file.events_path,
            http_endpoint: output_file.http_endpoint,
        };

        Ok(Self {
            source,
            pipeline,
            classifier,
            output,
        })
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Some(url) = non_empty_env("DEPOSIT_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(path) = non_empty_env("DEPOSIT_MODEL_PATH") {
            self.classifier.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("DEPOSIT_LABELS_PATH") {
            self.classifier.labels_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("DEPOSIT_EVENTS_PATH") {
            self.output.events_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("DEPOSIT_ROI_DIR") {
            self.pipeline.roi_dir = Some(PathBuf::from(path));
        }
        if let Some(secs) = non_empty_env("DEPOSIT_SETTLE_SECS") {
            let secs: f64 = secs
                .parse()
                .map_err(|_| anyhow!("DEPOSIT_SETTLE_SECS must be a number of seconds"))?;
            self.pipeline.settle_duration = settle_from_secs(secs)?;
        }
        if let Some(frames) = non_empty_env("DEPOSIT_REQUIRED_FRAMES") {
            self.pipeline.detection_required_frames = frames
                .parse()
                .map_err(|_| anyhow!("DEPOSIT_REQUIRED_FRAMES must be an integer"))?;
        }
        if let Some(threshold) = non_empty_env("DEPOSIT_MOTION_THRESHOLD") {
            self.pipeline.motion.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("DEPOSIT_MOTION_THRESHOLD must be a number of pixels"))?;
        }
        if let Some(area) = non_empty_env("DEPOSIT_MIN_CONTOUR_AREA") {
            self.pipeline.min_contour_area = area
                .parse()
                .map_err(|_| anyhow!("DEPOSIT_MIN_CONTOUR_AREA must be a number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.source.url.trim().is_empty() {
            return Err(Error::config("source url must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(Error::config("source target fps must be >= 1"));
        }
        if self.classifier.input_size == 0 {
            return Err(Error::config("classifier input size must be >= 1"));
        }
        if self.classifier.model_path.is_some()
            && self.classifier.labels_path.is_none()
            && self.classifier.categories.is_empty()
        {
            return Err(Error::config(
                "a classifier model needs labels_path or categories",
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> anyhow::Result<DepositdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: DepositdConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().expect("defaults");
    }

    #[test]
    fn zero_required_frames_is_rejected() {
        let cfg = PipelineConfig {
            detection_required_frames: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn unreachable_motion_threshold_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.motion.search_radius = 2;
        cfg.motion.threshold = 3.0;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[cfg(not(feature = "cv-opencv"))]
    #[test]
    fn opencv_methods_need_the_feature() {
        let mut cfg = PipelineConfig::default();
        cfg.motion.method = FlowMethod::Farneback;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));

        let mut cfg = PipelineConfig::default();
        cfg.background.method = BackgroundMethod::Knn;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn negative_settle_is_rejected() {
        assert!(settle_from_secs(-1.0).is_err());
        assert!(settle_from_secs(f64::NAN).is_err());
        assert_eq!(settle_from_secs(0.5).unwrap(), Duration::from_millis(500));
    }
}
