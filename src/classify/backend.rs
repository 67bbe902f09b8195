use anyhow::Result;

use super::preprocess::{ClassifierInput, Preprocessing};
use super::result::Prediction;

/// Image classifier backend.
///
/// A backend declares the input layout it expects through `preprocessing()`.
/// The handoff prepares every crop to that layout before calling `classify`,
/// so backends only ever see a ready NCHW tensor.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn preprocessing(&self) -> Preprocessing;

    /// One forward pass. The input is read-only and dropped after the call.
    fn classify(&mut self, input: &ClassifierInput) -> Result<Prediction>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
