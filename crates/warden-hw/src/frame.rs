//! Frame type, frame source trait and raw-buffer grayscale conversion.

use image::GrayImage;
use std::time::Instant;

/// A captured grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence,
        }
    }
}

/// Anything that yields frames one at a time.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, crate::CameraError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len(yuyv, expected)?;
    let luma = yuyv[..expected].iter().step_by(2).copied().collect();
    to_image(luma, width, height)
}

/// Downscale 16-bit little-endian grayscale to 8 bits by keeping the high byte.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len(buf, expected)?;
    let luma = buf[..expected].chunks_exact(2).map(|px| px[1]).collect();
    to_image(luma, width, height)
}

/// Copy an 8-bit grayscale buffer.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    check_len(buf, expected)?;
    to_image(buf[..expected].to_vec(), width, height)
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn to_image(luma: Vec<u8>, width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let actual = luma.len();
    GrayImage::from_raw(width, height, luma).ok_or(FrameError::InvalidLength {
        expected: (width * height) as usize,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray.as_raw(), &vec![100, 200]);
    }

    #[test]
    fn test_yuyv_to_grayscale_4x2() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray.dimensions(), (4, 2));
        assert_eq!(gray.as_raw(), &vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let buf = vec![0xFF, 0x12, 0x00, 0xAB];
        let gray = y16_to_grayscale(&buf, 2, 1).unwrap();
        assert_eq!(gray.as_raw(), &vec![0x12, 0xAB]);
    }

    #[test]
    fn test_grey_trims_padding() {
        let gray = grey_to_grayscale(&[1, 2, 3, 4, 99, 99], 2, 2).unwrap();
        assert_eq!(gray.as_raw(), &vec![1, 2, 3, 4]);
    }
}
