//! Model store: the classifier artifact and the label store, persisted and
//! loaded as one unit.
//!
//! Layout of the model directory:
//!
//! ```text
//! model.json      classifier artifact (classifier's own format)
//! labels.json     {"0": "Alice", ...}
//! manifest.json   training id, timestamp and sha256 of both files
//! ```
//!
//! The manifest is written last and removed first, so a pair is only
//! visible once both halves are in place. A manifest whose digests do not
//! match the files on disk means the pair was mixed and is treated as
//! absent.

use crate::classifier::{ClassifierError, FaceClassifier};
use crate::labels::{LabelError, LabelStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MODEL_FILE: &str = "model.json";
pub const LABELS_FILE: &str = "labels.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no trained model in {0}")]
    NotTrained(PathBuf),
    #[error("model store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest format: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("label store: {0}")]
    Labels(#[from] LabelError),
    #[error("classifier artifact: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Metadata tying a model artifact to its label store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub training_id: String,
    pub trained_at: DateTime<Utc>,
    pub people: usize,
    pub samples: usize,
    pub model_sha256: String,
    pub labels_sha256: String,
}

/// A loaded pair. The classifier passed to [`ModelStore::load`] holds the
/// model half.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub labels: LabelStore,
    pub manifest: Manifest,
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether all three files are present. Does not verify digests.
    pub fn exists(&self) -> bool {
        [MODEL_FILE, LABELS_FILE, MANIFEST_FILE]
            .iter()
            .all(|f| self.path(f).is_file())
    }

    /// Persist a trained classifier and its labels.
    ///
    /// On failure no temporary files are left behind and no manifest is
    /// present, so the directory reads as untrained.
    pub fn save(
        &self,
        classifier: &dyn FaceClassifier,
        labels: &LabelStore,
        samples: usize,
    ) -> Result<Manifest, StoreError> {
        fs::create_dir_all(&self.dir)?;

        let manifest_path = self.path(MANIFEST_FILE);
        if manifest_path.exists() {
            fs::remove_file(&manifest_path)?;
        }

        let staged = Staged {
            model: self.path(&format!("{MODEL_FILE}.tmp")),
            labels: self.path(&format!("{LABELS_FILE}.tmp")),
            manifest: self.path(&format!("{MANIFEST_FILE}.tmp")),
        };
        let manifest = match self.publish(&staged, classifier, labels, samples) {
            Ok(manifest) => manifest,
            Err(e) => {
                staged.discard();
                return Err(e);
            }
        };

        tracing::info!(
            dir = %self.dir.display(),
            training_id = %manifest.training_id,
            people = manifest.people,
            samples = manifest.samples,
            "model saved"
        );
        Ok(manifest)
    }

    fn publish(
        &self,
        staged: &Staged,
        classifier: &dyn FaceClassifier,
        labels: &LabelStore,
        samples: usize,
    ) -> Result<Manifest, StoreError> {
        classifier.save(&staged.model)?;
        let label_bytes = labels.to_json()?;
        fs::write(&staged.labels, &label_bytes)?;

        let manifest = Manifest {
            training_id: uuid::Uuid::new_v4().to_string(),
            trained_at: Utc::now(),
            people: labels.len(),
            samples,
            model_sha256: sha256_hex(&fs::read(&staged.model)?),
            labels_sha256: sha256_hex(&label_bytes),
        };

        fs::rename(&staged.model, self.path(MODEL_FILE))?;
        fs::rename(&staged.labels, self.path(LABELS_FILE))?;
        fs::write(&staged.manifest, serde_json::to_vec_pretty(&manifest)?)?;
        fs::rename(&staged.manifest, self.path(MANIFEST_FILE))?;
        Ok(manifest)
    }

    /// Load the pair into `classifier`, or report `NotTrained` when either
    /// half is missing or the halves do not belong together.
    pub fn load(&self, classifier: &mut dyn FaceClassifier) -> Result<TrainedModel, StoreError> {
        if !self.exists() {
            tracing::debug!(dir = %self.dir.display(), "model pair incomplete");
            return Err(StoreError::NotTrained(self.dir.clone()));
        }

        let manifest: Manifest = serde_json::from_slice(&fs::read(self.path(MANIFEST_FILE))?)?;
        let model_path = self.path(MODEL_FILE);
        let label_bytes = fs::read(self.path(LABELS_FILE))?;

        let model_ok = sha256_hex(&fs::read(&model_path)?) == manifest.model_sha256;
        let labels_ok = sha256_hex(&label_bytes) == manifest.labels_sha256;
        if !(model_ok && labels_ok) {
            tracing::warn!(
                dir = %self.dir.display(),
                model_ok,
                labels_ok,
                "model and label store do not match their manifest; treating as untrained"
            );
            return Err(StoreError::NotTrained(self.dir.clone()));
        }

        let labels = LabelStore::from_json(&label_bytes)?;
        classifier.load(&model_path)?;

        tracing::info!(
            training_id = %manifest.training_id,
            people = labels.len(),
            "model loaded"
        );
        Ok(TrainedModel { labels, manifest })
    }
}

/// Temporary paths written before the rename into place.
struct Staged {
    model: PathBuf,
    labels: PathBuf,
    manifest: PathBuf,
}

impl Staged {
    fn discard(&self) {
        for path in [&self.model, &self.labels, &self.manifest] {
            match fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed staged file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove staged file"
                    )
                }
            }
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbph::LbphClassifier;
    use crate::types::Sample;
    use image::GrayImage;

    fn trained() -> (LbphClassifier, LabelStore) {
        let mut c = LbphClassifier::default();
        let faces = [
            GrayImage::from_fn(60, 60, |x, y| image::Luma([((x * 5 + y) % 256) as u8])),
            GrayImage::from_fn(60, 60, |x, y| {
                image::Luma([if (x / 6 + y / 6) % 2 == 0 { 20 } else { 200 }])
            }),
        ];
        let samples: Vec<Sample> = faces
            .into_iter()
            .enumerate()
            .map(|(i, face)| Sample {
                label: i as u32,
                face,
            })
            .collect();
        c.train(&samples).unwrap();
        let labels = [(0, "Alice".to_string()), (1, "Bob".to_string())].into_iter().collect();
        (c, labels)
    }

    #[test]
    fn test_load_empty_dir_is_not_trained() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model"));
        let mut c = LbphClassifier::default();
        assert!(matches!(store.load(&mut c), Err(StoreError::NotTrained(_))));
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model"));
        let (c, labels) = trained();
        let manifest = store.save(&c, &labels, 2).unwrap();
        assert!(store.exists());
        assert!(!dir.path().join("model").join("model.json.tmp").exists());

        let mut restored = LbphClassifier::default();
        let loaded = store.load(&mut restored).unwrap();
        assert_eq!(loaded.labels, labels);
        assert_eq!(loaded.manifest, manifest);
        assert_eq!(restored.sample_count(), 2);
    }

    #[test]
    fn test_missing_half_is_not_trained() {
        for missing in [MODEL_FILE, LABELS_FILE, MANIFEST_FILE] {
            let dir = tempfile::tempdir().unwrap();
            let store = ModelStore::new(dir.path());
            let (c, labels) = trained();
            store.save(&c, &labels, 2).unwrap();
            fs::remove_file(dir.path().join(missing)).unwrap();

            let mut restored = LbphClassifier::default();
            assert!(
                matches!(store.load(&mut restored), Err(StoreError::NotTrained(_))),
                "missing {missing}"
            );
            assert!(!restored.is_trained());
        }
    }

    #[test]
    fn test_mixed_pair_is_not_trained() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (c, labels) = trained();
        store.save(&c, &labels, 2).unwrap();

        // Labels from a different training run.
        let other: LabelStore = [(0, "Mallory".to_string())].into_iter().collect();
        fs::write(dir.path().join(LABELS_FILE), other.to_json().unwrap()).unwrap();

        let mut restored = LbphClassifier::default();
        assert!(matches!(store.load(&mut restored), Err(StoreError::NotTrained(_))));
    }

    #[test]
    fn test_resave_replaces_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (c, labels) = trained();
        let first = store.save(&c, &labels, 2).unwrap();
        let second = store.save(&c, &labels, 2).unwrap();
        assert_ne!(first.training_id, second.training_id);

        let mut restored = LbphClassifier::default();
        assert_eq!(store.load(&mut restored).unwrap().manifest.training_id, second.training_id);
    }

    /// Writes a partial artifact and then reports a full disk.
    struct FailingSave;

    impl FaceClassifier for FailingSave {
        fn train(&mut self, _samples: &[Sample]) -> Result<(), ClassifierError> {
            Ok(())
        }

        fn predict(&self, _face: &GrayImage) -> Result<crate::Prediction, ClassifierError> {
            Err(ClassifierError::NotTrained)
        }

        fn save(&self, path: &Path) -> Result<(), ClassifierError> {
            fs::write(path, b"{\"format\":")?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }

        fn load(&mut self, _path: &Path) -> Result<(), ClassifierError> {
            Err(ClassifierError::NotTrained)
        }

        fn is_trained(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_failed_save_leaves_no_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (c, labels) = trained();
        store.save(&c, &labels, 2).unwrap();

        assert!(matches!(
            store.save(&FailingSave, &labels, 2),
            Err(StoreError::Classifier(ClassifierError::Io(_)))
        ));
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![LABELS_FILE, MODEL_FILE]);
        assert!(!store.exists());
    }
}
