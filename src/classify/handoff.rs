use image::RgbImage;

use crate::error::{ClassificationError, Result};
use crate::frame::Frame;
use crate::BoundingBox;

use super::backend::Classifier;
use super::labels::{LabelTable, UNKNOWN_LABEL};
use super::preprocess::Preprocessing;

/// Resolved classification of one deposit crop.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: String,
    pub class_index: Option<usize>,
    pub confidence: Option<f32>,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            class_index: None,
            confidence: None,
        }
    }
}

/// Crop, prepare, classify and label a deposit region.
pub struct ClassificationHandoff {
    classifier: Box<dyn Classifier>,
    labels: LabelTable,
    preprocessing: Preprocessing,
}

impl ClassificationHandoff {
    pub fn new(classifier: Box<dyn Classifier>, labels: LabelTable) -> Result<Self> {
        let preprocessing = classifier.preprocessing();
        preprocessing.validate()?;
        if labels.is_empty() {
            log::warn!(
                "classifier '{}' has an empty label table, every deposit will be {}",
                classifier.name(),
                UNKNOWN_LABEL
            );
        }
        Ok(Self {
            classifier,
            labels,
            preprocessing,
        })
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn warm_up(&mut self) -> anyhow::Result<()> {
        self.classifier.warm_up()
    }

    /// Color crop of `region`, clamped to the frame.
    pub fn crop(
        &self,
        frame: &Frame,
        region: &BoundingBox,
    ) -> Result<RgbImage, ClassificationError> {
        frame.crop(region).ok_or_else(|| {
            ClassificationError::InvalidRegion(format!(
                "{:?} lies outside the {}x{} frame",
                region,
                frame.width(),
                frame.height()
            ))
        })
    }

    pub fn classify_region(
        &mut self,
        frame: &Frame,
        region: &BoundingBox,
    ) -> Result<Classification, ClassificationError> {
        let crop = self.crop(frame, region)?;
        self.classify_crop(&crop)
    }

    pub fn classify_crop(
        &mut self,
        crop: &RgbImage,
    ) -> Result<Classification, ClassificationError> {
        let input = self.preprocessing.prepare(crop)?;
        let prediction = self.classifier.classify(&input).map_err(|err| {
            match err.downcast::<ClassificationError>() {
                Ok(inner) => inner,
                Err(other) => ClassificationError::Unavailable(format!("{:#}", other)),
            }
        })?;
        prediction.check()?;

        let label = match self.labels.resolve(prediction.class_index) {
            Some(label) => label.to_string(),
            None => {
                log::debug!(
                    "class index {} outside label table of {}",
                    prediction.class_index,
                    self.labels.len()
                );
                UNKNOWN_LABEL.to_string()
            }
        };
        Ok(Classification {
            label,
            class_index: Some(prediction.class_index),
            confidence: prediction.confidence,
        })
    }
}
