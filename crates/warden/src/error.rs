use std::path::PathBuf;
use thiserror::Error;
use warden_core::{DetectorError, EnrollmentError, StoreError};
use warden_hw::{CameraError, LinkError};

/// Failures surfaced to the operator. None of them end the process; the
/// menu reports the message and waits for the next choice.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error(
        "enrollment folder {0} was missing; it has been created, \
         add one sub-folder of photos per person"
    )]
    EnrollmentRootMissing(PathBuf),
    #[error("no faces found in the enrollment photos; nothing was trained")]
    EmptyTrainingSet,
    #[error("no trained model in {0}")]
    NotTrained(PathBuf),
    #[error("camera unavailable: {0}")]
    CaptureSourceUnavailable(#[from] CameraError),
    #[error("hardware link unavailable: {0}")]
    HardwareLinkUnavailable(String),
    #[error("hardware write failed: {0}")]
    HardwareWriteFailed(std::io::Error),
    #[error("invalid person name {0:?}")]
    InvalidName(String),
    #[error(
        "face detector model {path} could not be loaded ({source}); download the SCRFD \
         det_10g.onnx model and set detector_model or WARDEN_DETECTOR_MODEL to its path"
    )]
    DetectorUnavailable {
        path: PathBuf,
        source: DetectorError,
    },
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("enrollment: {0}")]
    Enrollment(EnrollmentError),
    #[error("model store: {0}")]
    Store(StoreError),
    #[error("terminal: {0}")]
    Terminal(#[from] std::io::Error),
}

impl From<EnrollmentError> for WardenError {
    fn from(e: EnrollmentError) -> Self {
        match e {
            EnrollmentError::RootMissing(root) => Self::EnrollmentRootMissing(root),
            EnrollmentError::EmptyTrainingSet => Self::EmptyTrainingSet,
            EnrollmentError::InvalidName(name) => Self::InvalidName(name),
            EnrollmentError::Detector(e) => Self::Detector(e),
            EnrollmentError::Store(e) => e.into(),
            other => Self::Enrollment(other),
        }
    }
}

impl From<StoreError> for WardenError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotTrained(dir) => Self::NotTrained(dir),
            other => Self::Store(other),
        }
    }
}

impl From<LinkError> for WardenError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::WriteFailed(io) => Self::HardwareWriteFailed(io),
            other => Self::HardwareLinkUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrollment_errors_map_to_taxonomy() {
        let root = PathBuf::from("faces");
        assert!(matches!(
            WardenError::from(EnrollmentError::RootMissing(root.clone())),
            WardenError::EnrollmentRootMissing(p) if p == root
        ));
        assert!(matches!(
            WardenError::from(EnrollmentError::EmptyTrainingSet),
            WardenError::EmptyTrainingSet
        ));
        assert!(matches!(
            WardenError::from(EnrollmentError::Store(StoreError::NotTrained(root.clone()))),
            WardenError::NotTrained(_)
        ));
    }

    #[test]
    fn test_link_errors_map_to_taxonomy() {
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let write = LinkError::WriteFailed(broken);
        assert!(matches!(WardenError::from(write), WardenError::HardwareWriteFailed(_)));
        assert!(matches!(
            WardenError::from(LinkError::Unavailable("no device".into())),
            WardenError::HardwareLinkUnavailable(_)
        ));
    }

    #[test]
    fn test_missing_detector_message_names_the_model() {
        let err = WardenError::DetectorUnavailable {
            path: PathBuf::from("models/det_10g.onnx"),
            source: DetectorError::ModelNotFound("models/det_10g.onnx".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("models/det_10g.onnx"));
        assert!(msg.contains("WARDEN_DETECTOR_MODEL"));
    }
}
