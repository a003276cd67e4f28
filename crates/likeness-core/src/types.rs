use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Edge length of a normalized face crop, in pixels.
pub const FACE_SIZE: u32 = 128;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("raster is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("raster holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("face crop must be {FACE_SIZE}x{FACE_SIZE}, got {width}x{height}")]
    CropSize { width: u32, height: u32 },
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Which image of the pair an error or crop belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Before,
    After,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Before => "before",
            Side::After => "after",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded 3-channel raster in RGB channel order.
#[derive(Debug, Clone)]
pub struct RawImage {
    pixels: RgbImage,
}

impl RawImage {
    /// Wrap an already decoded RGB image.
    pub fn from_rgb(pixels: RgbImage) -> Result<Self, RasterError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(RasterError::Empty { width, height });
        }
        Ok(Self { pixels })
    }

    /// Build from a packed RGB buffer of `width * height * 3` bytes.
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RasterError> {
        let expected = width as usize * height as usize * 3;
        let actual = data.len();
        if actual != expected {
            return Err(RasterError::InvalidLength { width, height, expected, actual });
        }
        match RgbImage::from_raw(width, height, data) {
            Some(pixels) => Self::from_rgb(pixels),
            None => Err(RasterError::InvalidLength { width, height, expected, actual }),
        }
    }

    /// Build from a packed BGR buffer (OpenCV-style decode order).
    pub fn from_bgr_bytes(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self, RasterError> {
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Self::from_rgb_bytes(width, height, data)
    }

    /// Decode an encoded image (JPEG, PNG, WebP, ...) and convert it to RGB.
    pub fn decode(bytes: &[u8]) -> Result<Self, RasterError> {
        let decoded = image::load_from_memory(bytes)?;
        Self::from_rgb(decoded.to_rgb8())
    }

    /// A uniform image, mostly useful for tests and diagnostics.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, RasterError> {
        Self::from_rgb(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }
}

/// A localized face: 128x128, single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCrop {
    pixels: GrayImage,
}

impl FaceCrop {
    pub fn from_gray(pixels: GrayImage) -> Result<Self, RasterError> {
        let (width, height) = pixels.dimensions();
        if width != FACE_SIZE || height != FACE_SIZE {
            return Err(RasterError::CropSize { width, height });
        }
        Ok(Self { pixels })
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn into_gray(self) -> GrayImage {
        self.pixels
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Texture and gradient descriptors of one face crop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorPair {
    /// Uniform-LBP histogram, 10 bins summing to 1.
    pub texture: Vec<f64>,
    /// Block-normalized HOG vector.
    pub gradient: Vec<f64>,
}

/// Outcome of one pairwise comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub same_person: bool,
    /// Estimated probability of the same-person class, in [0, 1].
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_image_rejects_short_buffer() {
        let err = RawImage::from_rgb_bytes(4, 4, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, RasterError::InvalidLength { expected: 48, actual: 10, .. }));
    }

    #[test]
    fn test_raw_image_rejects_empty() {
        let err = RawImage::from_rgb_bytes(0, 0, Vec::new()).unwrap_err();
        assert!(matches!(err, RasterError::Empty { .. }));
    }

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let img = RawImage::from_bgr_bytes(1, 1, vec![10, 20, 30]).unwrap();
        assert_eq!(img.as_rgb().get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = RawImage::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, RasterError::Decode(_)));
    }

    #[test]
    fn test_face_crop_size_enforced() {
        assert!(FaceCrop::from_gray(GrayImage::new(64, 128)).is_err());
        assert!(FaceCrop::from_gray(GrayImage::new(FACE_SIZE, FACE_SIZE)).is_ok());
    }

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Before.to_string(), "before");
        assert_eq!(Side::After.to_string(), "after");
    }
}
