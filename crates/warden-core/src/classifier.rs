//! Face classification capability.

use crate::types::{Prediction, Sample};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier has not been trained")]
    NotTrained,
    #[error("no training samples")]
    NoSamples,
    #[error("face crop is empty")]
    EmptyFace,
    #[error("model artifact io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model artifact format: {0}")]
    Format(#[from] serde_json::Error),
    #[error("model artifact incompatible: {0}")]
    Incompatible(String),
}

/// Trainable face classifier.
///
/// `predict` returns the closest known label and a distance-like confidence
/// where lower is better. `save`/`load` use the classifier's own artifact
/// format; the caller owns pairing it with the label store.
pub trait FaceClassifier {
    fn train(&mut self, samples: &[Sample]) -> Result<(), ClassifierError>;

    fn predict(&self, face: &GrayImage) -> Result<Prediction, ClassifierError>;

    fn save(&self, path: &Path) -> Result<(), ClassifierError>;

    fn load(&mut self, path: &Path) -> Result<(), ClassifierError>;

    fn is_trained(&self) -> bool;
}
