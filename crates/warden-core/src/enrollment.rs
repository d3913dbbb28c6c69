//! Enrollment: turn per-person sample directories into a trained model.
//!
//! ```text
//! <root>/
//!   Alice/0.jpg 1.jpg ...
//!   Bob/portrait.png ...
//! ```
//!
//! Person directories are visited in lexicographic order of their names and
//! label ids are handed out in that order, skipping people who yield no face,
//! so ids always cover `0..N-1`.

use crate::classifier::{ClassifierError, FaceClassifier};
use crate::detector::{DetectorError, FaceDetector};
use crate::labels::LabelStore;
use crate::store::{Manifest, ModelStore, StoreError};
use crate::types::{LabelId, Sample};
use image::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error(
        "enrollment root {0} did not exist; it has been created, \
         add one folder of images per person"
    )]
    RootMissing(PathBuf),
    #[error("no faces found in the enrollment images")]
    EmptyTrainingSet,
    #[error("invalid person name {0:?}")]
    InvalidName(String),
    #[error("enrollment io: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture save failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("training: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("model store: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a successful enrollment run.
#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub labels: LabelStore,
    pub samples: usize,
    pub images_scanned: usize,
    /// Person directories that produced no face and received no label.
    pub skipped_people: Vec<String>,
    pub manifest: Manifest,
}

/// Samples gathered from an enrollment root, before training.
#[derive(Debug, Default)]
pub struct TrainingSet {
    pub samples: Vec<Sample>,
    pub labels: LabelStore,
    pub images_scanned: usize,
    pub skipped_people: Vec<String>,
}

/// Scan the enrollment root, train `classifier` and persist the pair.
///
/// Nothing is written to the model directory unless training succeeds.
pub fn run_enrollment(
    root: &Path,
    detector: &mut dyn FaceDetector,
    classifier: &mut dyn FaceClassifier,
    store: &ModelStore,
) -> Result<EnrollmentReport, EnrollmentError> {
    if !root.is_dir() {
        fs::create_dir_all(root)?;
        tracing::warn!(root = %root.display(), "enrollment root created; it is empty");
        return Err(EnrollmentError::RootMissing(root.to_path_buf()));
    }

    tracing::info!(root = %root.display(), "collecting training samples");
    let set = collect_samples(root, detector)?;
    if set.samples.is_empty() {
        tracing::warn!(images = set.images_scanned, "no faces in enrollment images");
        return Err(EnrollmentError::EmptyTrainingSet);
    }

    classifier.train(&set.samples)?;
    let manifest = store.save(&*classifier, &set.labels, set.samples.len())?;

    tracing::info!(
        samples = set.samples.len(),
        people = set.labels.len(),
        skipped = set.skipped_people.len(),
        "training complete"
    );

    Ok(EnrollmentReport {
        samples: set.samples.len(),
        labels: set.labels,
        images_scanned: set.images_scanned,
        skipped_people: set.skipped_people,
        manifest,
    })
}

/// Walk the person directories and crop every detected face.
pub fn collect_samples(
    root: &Path,
    detector: &mut dyn FaceDetector,
) -> Result<TrainingSet, EnrollmentError> {
    let mut set = TrainingSet::default();
    let mut next_id: LabelId = 0;

    for (name, dir) in person_dirs(root)? {
        let mut faces = Vec::new();
        for path in image_files(&dir)? {
            set.images_scanned += 1;
            let image = match image::open(&path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    continue;
                }
            };
            let rects = detector.detect_faces(&image)?;
            tracing::debug!(path = %path.display(), faces = rects.len(), "scanned image");
            faces.extend(rects.iter().filter_map(|r| r.crop(&image)));
        }

        if faces.is_empty() {
            tracing::warn!(person = %name, "no faces found; person not enrolled");
            set.skipped_people.push(name);
            continue;
        }

        let label = next_id;
        next_id += 1;
        set.samples.extend(faces.into_iter().map(|face| Sample { label, face }));
        set.labels.insert(label, name);
    }

    Ok(set)
}

/// Direct subdirectories of `root` as (name, path), sorted by name.
fn person_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>, EnrollmentError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 directory name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

fn is_image(path: &Path) -> bool {
    let hidden = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.'));
    !hidden
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Image files in a person directory, sorted by file name.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, EnrollmentError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Directory that receives captures for `name`, created if absent.
pub fn person_dir(root: &Path, name: &str) -> Result<PathBuf, EnrollmentError> {
    let name = name.trim();
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(EnrollmentError::InvalidName(name.to_string()));
    }
    let dir = root.join(name);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// First unused `<n>.jpg` index in a person directory.
pub fn next_capture_index(dir: &Path) -> Result<u32, EnrollmentError> {
    let mut next = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let index = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u32>().ok());
        if let Some(n) = index {
            next = next.max(n + 1);
        }
    }
    Ok(next)
}

/// Write one captured frame as `<dir>/<index>.jpg`.
pub fn save_capture(dir: &Path, index: u32, frame: &GrayImage) -> Result<PathBuf, EnrollmentError> {
    let path = dir.join(format!("{index}.jpg"));
    frame.save(&path)?;
    tracing::debug!(path = %path.display(), "capture saved");
    Ok(path)
}
