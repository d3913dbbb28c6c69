use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Integer identifier the classifier uses in place of a person's name.
pub type LabelId = u32;

/// Face rectangle in frame pixel coordinates, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector score in [0, 1]. Not used for recognition decisions.
    pub score: f32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score: 1.0,
        }
    }

    /// Clip the rectangle to an image of the given size.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self {
            width: w,
            height: h,
            ..*self
        })
    }

    /// Crop this region out of a grayscale image.
    pub fn crop(&self, image: &GrayImage) -> Option<GrayImage> {
        let r = self.clamp_to(image.width(), image.height())?;
        Some(image::imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image())
    }
}

/// A cropped grayscale face associated with exactly one label.
#[derive(Debug, Clone)]
pub struct Sample {
    pub label: LabelId,
    pub face: GrayImage,
}

/// Classifier output for one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: LabelId,
    /// Distance-like score: lower is a closer match.
    pub confidence: f64,
}

impl Prediction {
    /// Cosmetic percentage shown next to a face. Goes negative when
    /// confidence exceeds 100.
    pub fn match_strength(&self) -> i64 {
        (100.0 - self.confidence) as i64
    }

    /// Whether this prediction clears the threshold. Equality is a miss.
    pub fn is_below(&self, threshold: f64) -> bool {
        self.confidence < threshold
    }
}

/// An enrolled individual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub label: LabelId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside() {
        let r = FaceRect::new(10, 10, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(r));
    }

    #[test]
    fn test_clamp_overhang() {
        let r = FaceRect::new(90, 95, 20, 20).clamp_to(100, 100).unwrap();
        assert_eq!((r.width, r.height), (10, 5));
    }

    #[test]
    fn test_clamp_outside() {
        assert!(FaceRect::new(100, 0, 5, 5).clamp_to(100, 100).is_none());
        assert!(FaceRect::new(0, 0, 0, 5).clamp_to(100, 100).is_none());
    }

    #[test]
    fn test_crop_dimensions() {
        let img = GrayImage::from_pixel(64, 48, image::Luma([7]));
        let face = FaceRect::new(60, 40, 10, 10).crop(&img).unwrap();
        assert_eq!(face.dimensions(), (4, 8));
    }

    #[test]
    fn test_threshold_is_strict() {
        let p = Prediction {
            label: 0,
            confidence: 70.0,
        };
        assert!(!p.is_below(70.0));
        assert!(p.is_below(70.000_001));
        let q = Prediction {
            label: 0,
            confidence: 69.999,
        };
        assert!(q.is_below(70.0));
    }

    #[test]
    fn test_match_strength_goes_negative() {
        let close = Prediction {
            label: 0,
            confidence: 40.0,
        };
        let far = Prediction {
            label: 0,
            confidence: 130.5,
        };
        assert_eq!(close.match_strength(), 60);
        assert_eq!(far.match_strength(), -30);
    }
}
