//! Local Binary Patterns Histograms face classifier.
//!
//! Each face is resized to a fixed square, encoded as 8-neighbour LBP codes
//! (radius 1), split into a grid, and summarised by one 256-bin histogram
//! per cell normalised to unit mass. Prediction is nearest neighbour over
//! all training histograms under the alternative chi-square distance, so
//! identical faces score 0 and unrelated ones score in the low hundreds.

use crate::classifier::{ClassifierError, FaceClassifier};
use crate::types::{LabelId, Prediction, Sample};
use image::imageops::FilterType;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

const LBPH_FORMAT: &str = "lbph-v1";
const LBP_BINS: usize = 256;
const CHI_SQUARE_EPSILON: f32 = f32::EPSILON;

/// Clockwise from the top-left neighbour.
const NEIGHBOURS: [(i32, i32); 8] =
    [(-1, -1), (0, -1), (1, -1), (1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub grid_x: u32,
    pub grid_y: u32,
    /// Faces are resized to `face_size × face_size` before encoding.
    pub face_size: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            grid_x: 8,
            grid_y: 8,
            face_size: 100,
        }
    }
}

impl LbphParams {
    /// LBP needs a one-pixel border, so faces smaller than 3×3 have no codes.
    fn validate(&self) -> Result<(), ClassifierError> {
        if self.face_size < 3 {
            return Err(ClassifierError::Incompatible(format!(
                "face size {} is below 3",
                self.face_size
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(ClassifierError::Incompatible("empty histogram grid".into()));
        }
        Ok(())
    }
}

/// Serialized model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LbphArtifact {
    format: String,
    params: LbphParams,
    labels: Vec<LabelId>,
    histograms: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct LbphClassifier {
    params: LbphParams,
    labels: Vec<LabelId>,
    histograms: Vec<Vec<f32>>,
}

impl LbphClassifier {
    pub fn new(params: LbphParams) -> Result<Self, ClassifierError> {
        params.validate()?;
        Ok(Self {
            params,
            labels: Vec::new(),
            histograms: Vec::new(),
        })
    }

    /// Number of stored training histograms.
    pub fn sample_count(&self) -> usize {
        self.histograms.len()
    }

    fn histogram(&self, face: &GrayImage) -> Result<Vec<f32>, ClassifierError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(ClassifierError::EmptyFace);
        }
        let size = self.params.face_size;
        let face = if face.dimensions() == (size, size) {
            face.clone()
        } else {
            image::imageops::resize(face, size, size, FilterType::Triangle)
        };
        let codes = lbp_codes(&face);
        let (gx, gy) = (self.params.grid_x, self.params.grid_y);
        Ok(spatial_histogram(&codes, size - 2, size - 2, gx, gy))
    }
}

/// LBP code for every interior pixel, row-major, `(w-2) × (h-2)` values.
fn lbp_codes(image: &GrayImage) -> Vec<u8> {
    let (w, h) = image.dimensions();
    let mut codes = Vec::with_capacity((w.saturating_sub(2) * h.saturating_sub(2)) as usize);
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let center = image.get_pixel(x, y)[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let n = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
                if n >= center {
                    code |= 1 << (7 - bit);
                }
            }
            codes.push(code);
        }
    }
    codes
}

/// Concatenated per-cell histograms, each normalised to sum to 1.
fn spatial_histogram(
    codes: &[u8],
    width: u32,
    height: u32,
    grid_x: u32,
    grid_y: u32,
) -> Vec<f32> {
    let (w, h) = (width as usize, height as usize);
    let (gx, gy) = (grid_x as usize, grid_y as usize);
    let mut out = vec![0f32; gx * gy * LBP_BINS];

    for row in 0..gy {
        let (y0, y1) = (row * h / gy, (row + 1) * h / gy);
        for col in 0..gx {
            let (x0, x1) = (col * w / gx, (col + 1) * w / gx);
            let cell = &mut out[(row * gx + col) * LBP_BINS..][..LBP_BINS];
            let mut count = 0u32;
            for y in y0..y1 {
                for &code in &codes[y * w + x0..y * w + x1] {
                    cell[code as usize] += 1.0;
                    count += 1;
                }
            }
            if count > 0 {
                cell.iter_mut().for_each(|v| *v /= count as f32);
            }
        }
    }
    out
}

fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .filter(|(x, y)| *x + *y > CHI_SQUARE_EPSILON)
        .map(|(x, y)| (2.0 * (x - y) * (x - y) / (x + y)) as f64)
        .sum()
}

impl FaceClassifier for LbphClassifier {
    fn train(&mut self, samples: &[Sample]) -> Result<(), ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        let mut labels = Vec::with_capacity(samples.len());
        let mut histograms = Vec::with_capacity(samples.len());
        for sample in samples {
            histograms.push(self.histogram(&sample.face)?);
            labels.push(sample.label);
        }
        self.labels = labels;
        self.histograms = histograms;
        tracing::debug!(samples = self.histograms.len(), "LBPH trained");
        Ok(())
    }

    fn predict(&self, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        if !self.is_trained() {
            return Err(ClassifierError::NotTrained);
        }
        let query = self.histogram(face)?;
        let (idx, distance) = self
            .histograms
            .iter()
            .map(|h| chi_square(h, &query))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or(ClassifierError::NotTrained)?;
        Ok(Prediction {
            label: self.labels[idx],
            confidence: distance,
        })
    }

    fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        if !self.is_trained() {
            return Err(ClassifierError::NotTrained);
        }
        let artifact = LbphArtifact {
            format: LBPH_FORMAT.to_string(),
            params: self.params,
            labels: self.labels.clone(),
            histograms: self.histograms.clone(),
        };
        std::fs::write(path, serde_json::to_vec(&artifact)?)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), ClassifierError> {
        let artifact: LbphArtifact = serde_json::from_slice(&std::fs::read(path)?)?;
        if artifact.format != LBPH_FORMAT {
            return Err(ClassifierError::Incompatible(format!(
                "unknown format {:?}",
                artifact.format
            )));
        }
        artifact.params.validate()?;
        let expected = (artifact.params.grid_x * artifact.params.grid_y) as usize * LBP_BINS;
        if artifact.labels.len() != artifact.histograms.len()
            || artifact.histograms.iter().any(|h| h.len() != expected)
        {
            return Err(ClassifierError::Incompatible("histogram shape mismatch".into()));
        }
        self.params = artifact.params;
        self.labels = artifact.labels;
        self.histograms = artifact.histograms;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        !self.histograms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic textured face: diagonal stripes with a per-person phase.
    fn face(phase: u32, size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let v = ((x * 7 + y * 3 + phase * 11) % 32) * 8;
            image::Luma([v as u8])
        })
    }

    fn checker(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            image::Luma([if (x / 5 + y / 5) % 2 == 0 { 30 } else { 220 }])
        })
    }

    #[test]
    fn test_lbp_flat_image_all_ones() {
        let img = GrayImage::from_pixel(4, 4, image::Luma([50]));
        let codes = lbp_codes(&img);
        assert_eq!(codes.len(), 4);
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_cell_histograms_normalised() {
        let c = LbphClassifier::default();
        let h = c.histogram(&face(1, 100)).unwrap();
        assert_eq!(h.len(), 64 * LBP_BINS);
        for cell in h.chunks(LBP_BINS) {
            let sum: f32 = cell.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "cell sum {sum}");
        }
    }

    #[test]
    fn test_predict_untrained() {
        let c = LbphClassifier::default();
        assert!(matches!(c.predict(&face(0, 100)), Err(ClassifierError::NotTrained)));
    }

    #[test]
    fn test_train_empty() {
        let mut c = LbphClassifier::default();
        assert!(matches!(c.train(&[]), Err(ClassifierError::NoSamples)));
    }

    #[test]
    fn test_identical_face_scores_zero() {
        let mut c = LbphClassifier::default();
        c.train(&[
            Sample {
                label: 0,
                face: face(0, 100),
            },
            Sample {
                label: 1,
                face: checker(100),
            },
        ])
        .unwrap();
        let p = c.predict(&checker(100)).unwrap();
        assert_eq!(p.label, 1);
        assert!(p.confidence < 1e-6);
    }

    #[test]
    fn test_nearest_label_wins() {
        let mut c = LbphClassifier::default();
        c.train(&[
            Sample {
                label: 0,
                face: face(0, 120),
            },
            Sample {
                label: 1,
                face: checker(120),
            },
        ])
        .unwrap();
        let p = c.predict(&checker(90)).unwrap();
        assert_eq!(p.label, 1);
        let other = chi_square(&c.histograms[0], &c.histogram(&checker(90)).unwrap());
        assert!(p.confidence < other);
    }

    #[test]
    fn test_save_load_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut c = LbphClassifier::default();
        c.train(&[
            Sample {
                label: 0,
                face: face(0, 100),
            },
            Sample {
                label: 1,
                face: face(2, 100),
            },
            Sample {
                label: 2,
                face: checker(100),
            },
        ])
        .unwrap();
        c.save(&path).unwrap();

        let mut restored = LbphClassifier::default();
        restored.load(&path).unwrap();
        for query in [face(0, 80), face(2, 110), checker(64), face(5, 100)] {
            assert_eq!(c.predict(&query).unwrap(), restored.predict(&query).unwrap());
        }
    }

    #[test]
    fn test_load_rejects_foreign_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let artifact = r#"{"format":"eigen","params":{"grid_x":8,"grid_y":8,"face_size":100},
            "labels":[],"histograms":[]}"#;
        std::fs::write(&path, artifact).unwrap();
        let mut c = LbphClassifier::default();
        assert!(matches!(c.load(&path), Err(ClassifierError::Incompatible(_))));
    }

    #[test]
    fn test_new_rejects_degenerate_params() {
        for params in [
            LbphParams {
                face_size: 2,
                ..LbphParams::default()
            },
            LbphParams {
                face_size: 0,
                ..LbphParams::default()
            },
            LbphParams {
                grid_x: 0,
                ..LbphParams::default()
            },
        ] {
            assert!(matches!(LbphClassifier::new(params), Err(ClassifierError::Incompatible(_))));
        }
    }

    #[test]
    fn test_smallest_face_size_trains() {
        let params = LbphParams {
            grid_x: 1,
            grid_y: 1,
            face_size: 3,
        };
        let mut c = LbphClassifier::new(params).unwrap();
        c.train(&[Sample {
            label: 4,
            face: checker(20),
        }])
        .unwrap();
        assert_eq!(c.predict(&checker(20)).unwrap().label, 4);
    }
}
