//! warden-core: recognition-to-lock pipeline.
//!
//! Face detection (SCRFD via ONNX Runtime) and LBPH classification sit
//! behind the [`FaceDetector`] and [`FaceClassifier`] traits so enrollment
//! and the live session can run against any implementation.

pub mod classifier;
pub mod detector;
pub mod enrollment;
pub mod labels;
pub mod lbph;
pub mod session;
pub mod store;
pub mod types;

pub use classifier::{ClassifierError, FaceClassifier};
pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use enrollment::{run_enrollment, EnrollmentError, EnrollmentReport};
pub use labels::LabelStore;
pub use lbph::{LbphClassifier, LbphParams};
pub use session::{RecognitionSession, SessionEvent, Step};
pub use store::{ModelStore, StoreError, TrainedModel};
pub use types::{FaceRect, LabelId, Person, Prediction, Sample};
