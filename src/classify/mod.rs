//! Classification handoff: crop a confirmed region, prepare it for the
//! classifier, run one forward pass and resolve the label.

mod backend;
mod backends;
mod handoff;
mod labels;
mod preprocess;
mod result;

pub use backend::Classifier;
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifier;
pub use handoff::{Classification, ClassificationHandoff};
pub use labels::{LabelTable, UNKNOWN_LABEL};
pub use preprocess::{
    ChannelOrder, ClassifierInput, Preprocessing, ResizeMode, IMAGENET_MEAN, IMAGENET_STD,
};
pub use result::Prediction;
