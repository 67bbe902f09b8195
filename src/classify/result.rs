use crate::error::ClassificationError;

/// Raw classifier output: an index into the label table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// Probability of the predicted class, when the backend reports one.
    pub confidence: Option<f32>,
}

impl Prediction {
    pub fn new(class_index: usize) -> Self {
        Self {
            class_index,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Argmax over raw logits, with the softmax probability of the winner.
    pub fn from_logits(logits: &[f32]) -> Result<Self, ClassificationError> {
        if logits.is_empty() {
            return Err(ClassificationError::MalformedPrediction(
                "empty score vector".into(),
            ));
        }
        if let Some(pos) = logits.iter().position(|v| !v.is_finite()) {
            return Err(ClassificationError::MalformedPrediction(format!(
                "non-finite score at index {}",
                pos
            )));
        }

        let mut best = 0;
        for (i, score) in logits.iter().enumerate() {
            if *score > logits[best] {
                best = i;
            }
        }
        let max = logits[best];
        let denom: f32 = logits.iter().map(|v| (v - max).exp()).sum();
        Ok(Self::new(best).with_confidence(1.0 / denom))
    }

    pub(crate) fn check(&self) -> Result<(), ClassificationError> {
        match self.confidence {
            Some(c) if !c.is_finite() || !(0.0..=1.0).contains(&c) => Err(
                ClassificationError::MalformedPrediction(format!("confidence {} out of range", c)),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_with_softmax_confidence() {
        let prediction = Prediction::from_logits(&[0.0, 2.0, 0.0]).expect("valid logits");
        assert_eq!(prediction.class_index, 1);
        let expected = 2f32.exp() / (2.0 + 2f32.exp());
        let confidence = prediction.confidence.expect("confidence");
        assert!((confidence - expected).abs() < 1e-6);
    }

    #[test]
    fn ties_pick_lowest_index() {
        let prediction = Prediction::from_logits(&[1.0, 1.0]).expect("valid logits");
        assert_eq!(prediction.class_index, 0);
    }

    #[test]
    fn malformed_scores_are_rejected() {
        assert!(matches!(
            Prediction::from_logits(&[]),
            Err(ClassificationError::MalformedPrediction(_))
        ));
        assert!(Prediction::from_logits(&[0.1, f32::NAN]).is_err());
        assert!(Prediction::new(0).with_confidence(1.5).check().is_err());
        assert!(Prediction::new(0).check().is_ok());
    }
}
