#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::classify::backend::Classifier;
use crate::classify::preprocess::{ClassifierInput, Preprocessing};
use crate::classify::result::Prediction;

/// Tract-based ONNX image classifier.
///
/// Loads a local model whose single input is `1 x 3 x H x W` f32 and whose
/// first output holds one logit per class.
pub struct TractClassifier {
    model: TypedRunnableModel<TypedModel>,
    preprocessing: Preprocessing,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, preprocessing: Preprocessing) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        preprocessing.height as usize,
                        preprocessing.width as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            preprocessing,
        })
    }

    /// EfficientNet-style input: square `size`, ImageNet statistics.
    pub fn imagenet<P: AsRef<Path>>(model_path: P, size: u32) -> Result<Self> {
        Self::new(model_path, Preprocessing::imagenet(size))
    }

    fn build_input(&self, input: &ClassifierInput) -> Result<Tensor> {
        if input.width() != self.preprocessing.width || input.height() != self.preprocessing.height
        {
            return Err(anyhow!(
                "input size {}x{} does not match model input {}x{}",
                input.width(),
                input.height(),
                self.preprocessing.width,
                self.preprocessing.height
            ));
        }
        let shape = (
            1,
            3,
            self.preprocessing.height as usize,
            self.preprocessing.width as usize,
        );
        let array = tract_ndarray::Array4::from_shape_vec(shape, input.as_slice().to_vec())
            .context("input tensor has wrong length")?;
        Ok(array.into_tensor())
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn preprocessing(&self) -> Preprocessing {
        self.preprocessing
    }

    fn classify(&mut self, input: &ClassifierInput) -> Result<Prediction> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let logits: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        Ok(Prediction::from_logits(&logits)?)
    }

    fn warm_up(&mut self) -> Result<()> {
        let p = self.preprocessing;
        let blank = image::RgbImage::new(p.width, p.height);
        let input = p.prepare(&blank)?;
        self.classify(&input).map(|_| ())
    }
}
