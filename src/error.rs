//! Error taxonomy surfaced by the deposit pipeline.
//!
//! The per-frame loop distinguishes four failure classes:
//! - `FrameAcquisition`: the source is exhausted or unreadable. Terminates the loop.
//! - `TransientFrame`: a single bad frame. The cycle is skipped, prior state kept.
//! - `Classification`: the classifier failed. The deposit still registers, labeled `Unknown`.
//! - `Configuration`: invalid thresholds at startup. Fatal before the loop starts.
//!
//! `Delivery` covers sink failures, which are reported but never retried here.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame acquisition failed: {0}")]
    FrameAcquisition(String),

    #[error("transient frame error: {0}")]
    TransientFrame(String),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("event delivery failed: {0}")]
    Delivery(String),
}

impl Error {
    /// True when the loop may continue with the next frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientFrame(_))
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn transient(msg: impl Into<String>) -> Self {
        Error::TransientFrame(msg.into())
    }

    pub(crate) fn acquisition(msg: impl Into<String>) -> Self {
        Error::FrameAcquisition(msg.into())
    }
}

/// Failure inside the classification handoff.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("malformed prediction: {0}")]
    MalformedPrediction(String),

    #[error("region cannot be cropped: {0}")]
    InvalidRegion(String),
}
