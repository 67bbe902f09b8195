use anyhow::{anyhow, Result};

use crate::classify::backend::Classifier;
use crate::classify::preprocess::{ClassifierInput, Preprocessing};
use crate::classify::result::Prediction;

const STUB_INPUT_SIZE: u32 = 16;

#[derive(Clone, Copy, Debug)]
enum Mode {
    Fixed(usize),
    IntensityBins(usize),
    Failing,
}

/// Deterministic classifier for tests and the demo.
///
/// - `fixed(i)` always predicts `i`.
/// - `intensity_bins(n)` splits mean crop brightness into `n` equal bins, so a
///   dark object maps to a low index and a bright one to a high index.
/// - `failing()` errors on every call.
pub struct StubClassifier {
    mode: Mode,
    calls: u64,
}

impl StubClassifier {
    pub fn fixed(index: usize) -> Self {
        Self::with_mode(Mode::Fixed(index))
    }

    pub fn intensity_bins(bins: usize) -> Self {
        Self::with_mode(Mode::IntensityBins(bins.max(1)))
    }

    pub fn failing() -> Self {
        Self::with_mode(Mode::Failing)
    }

    fn with_mode(mode: Mode) -> Self {
        Self { mode, calls: 0 }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::fixed(0)
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn preprocessing(&self) -> Preprocessing {
        Preprocessing::unit(STUB_INPUT_SIZE, STUB_INPUT_SIZE)
    }

    fn classify(&mut self, input: &ClassifierInput) -> Result<Prediction> {
        self.calls += 1;
        match self.mode {
            Mode::Fixed(index) => Ok(Prediction::new(index).with_confidence(1.0)),
            Mode::IntensityBins(bins) => {
                let brightness = input.mean().clamp(0.0, 1.0);
                let index = ((brightness * bins as f32) as usize).min(bins - 1);
                Ok(Prediction::new(index))
            }
            Mode::Failing => Err(anyhow!("stub classifier configured to fail")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn input_of(value: u8) -> ClassifierInput {
        let crop = RgbImage::from_pixel(12, 12, Rgb([value, value, value]));
        StubClassifier::default()
            .preprocessing()
            .prepare(&crop)
            .expect("prepared")
    }

    #[test]
    fn intensity_bins_follow_brightness() -> Result<()> {
        let mut stub = StubClassifier::intensity_bins(8);
        assert_eq!(stub.classify(&input_of(0))?.class_index, 0);
        assert_eq!(stub.classify(&input_of(100))?.class_index, 3);
        assert_eq!(stub.classify(&input_of(255))?.class_index, 7);
        assert_eq!(stub.calls(), 3);
        Ok(())
    }

    #[test]
    fn failing_stub_errors() {
        let mut stub = StubClassifier::failing();
        assert!(stub.classify(&input_of(10)).is_err());
    }
}
