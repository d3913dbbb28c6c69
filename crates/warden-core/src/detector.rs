//! Face detection capability and its SCRFD implementation over ONNX Runtime.
//!
//! Anything that can locate faces in a grayscale image implements
//! [`FaceDetector`]. The shipped implementation is [`ScrfdDetector`], which
//! letterboxes the frame into a 640×640 tensor, decodes the three stride
//! heads and suppresses overlapping boxes.

use crate::types::FaceRect;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates face rectangles in an image.
pub trait FaceDetector {
    fn detect_faces(&mut self, image: &GrayImage) -> Result<Vec<FaceRect>, DetectorError>;
}

/// Scale and padding applied when fitting a frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    /// Map a point in letterboxed space back to the source frame.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Candidate box in source-frame float coordinates, before clamping.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }

    fn into_rect(self, width: u32, height: u32) -> Option<FaceRect> {
        let x1 = self.x1.clamp(0.0, width as f32);
        let y1 = self.y1.clamp(0.0, height as f32);
        let x2 = self.x2.clamp(0.0, width as f32);
        let y2 = self.y2.clamp(0.0, height as f32);
        let rect = FaceRect {
            x: x1.round() as u32,
            y: y1.round() as u32,
            width: (x2 - x1).round() as u32,
            height: (y2 - y1).round() as u32,
            score: self.score,
        };
        rect.clamp_to(width, height)
    }
}

/// SCRFD detector (`det_10g.onnx` or a compatible export).
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride (score, bbox) output indices.
    heads: [(usize, usize); 3],
    min_face_size: u32,
}

impl ScrfdDetector {
    /// Load the ONNX model. Faces smaller than `min_face_size` pixels on
    /// either side are discarded.
    pub fn load(model_path: &Path, min_face_size: u32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox heads for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let heads = head_indices(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            ?heads,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            heads,
            min_face_size,
        })
    }

    fn to_tensor(image: &GrayImage, letterbox: &Letterbox) -> Array4<f32> {
        let new_w = SCRFD_INPUT_SIZE - 2 * letterbox.pad_x;
        let new_h = SCRFD_INPUT_SIZE - 2 * letterbox.pad_y;
        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        // Padding normalizes to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let v = (pixel[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = v;
            }
        }
        tensor
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect_faces(&mut self, image: &GrayImage) -> Result<Vec<FaceRect>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let letterbox = Letterbox::fit(width, height);
        let input = Self::to_tensor(image, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.heads[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
                })?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
                })?;
            candidates.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }

        let faces: Vec<FaceRect> = suppress(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter_map(|c| c.into_rect(width, height))
            .filter(|r| r.width >= self.min_face_size && r.height >= self.min_face_size)
            .collect();

        tracing::trace!(count = faces.len(), "faces detected");
        Ok(faces)
    }
}

/// Map each stride to its (score, bbox) output index.
///
/// Uses `score_<stride>` / `bbox_<stride>` names when the export carries
/// them, otherwise the conventional positional layout.
fn head_indices(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: u32| {
        names.iter().position(|n| *n == format!("{prefix}_{stride}"))
    };
    let named: Option<Vec<(usize, usize)>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();
    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: u32,
    letterbox: &Letterbox,
) -> Vec<Candidate> {
    let grid = (SCRFD_INPUT_SIZE / stride) as usize;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCRFD_SCORE_THRESHOLD {
                return None;
            }
            let off = bboxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;
            let (x1, y1) = letterbox.unmap(ax - off[0] * step, ay - off[1] * step);
            let (x2, y2) = letterbox.unmap(ax + off[2] * step, ay + off[3] * step);
            Some(Candidate {
                x1,
                y1,
                x2,
                y2,
                score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| k.iou(&c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x: f32, y: f32, w: f32, h: f32, score: f32) -> Candidate {
        Candidate {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
            score,
        }
    }

    #[test]
    fn test_iou_partial() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppress_keeps_best_of_overlap() {
        let kept = suppress(
            vec![
                cand(5.0, 5.0, 100.0, 100.0, 0.8),
                cand(0.0, 0.0, 100.0, 100.0, 0.9),
                cand(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 80);
        let (x, y) =
            lb.unmap(100.0 * lb.scale + lb.pad_x as f32, 50.0 * lb.scale + lb.pad_y as f32);
        assert!((x - 100.0).abs() < 0.1 && (y - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_candidate_clamped_to_frame() {
        let r = cand(-10.0, 20.0, 50.0, 500.0, 0.9).into_rect(320, 240).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (0, 20, 40, 220));
    }

    #[test]
    fn test_head_indices_named_and_positional() {
        let named: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(head_indices(&named), [(1, 0), (3, 2), (5, 4)]);

        let generic: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(head_indices(&generic), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_tensor_padding_is_zero() {
        let img = GrayImage::from_pixel(320, 240, image::Luma([255]));
        let lb = Letterbox::fit(320, 240);
        let t = ScrfdDetector::to_tensor(&img, &lb);
        assert_eq!(t.shape(), &[1, 3, 640, 640]);
        assert_eq!(t[[0, 0, 0, 0]], 0.0);
        let inside = t[[0, 2, 320, 320]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-6);
    }
}
