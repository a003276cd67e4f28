//! Face localization: detect, crop, resize to 128x128, grayscale.

use crate::detector::{DetectorError, FaceDetect};
use crate::resize;
use crate::types::{BoundingBox, FaceCrop, RasterError, RawImage, FACE_SIZE};
use image::imageops;
use image::{GrayImage, Luma, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalizeError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("invalid face crop: {0}")]
    Raster(#[from] RasterError),
}

/// Integer pixel rectangle clipped to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Round a detection to whole pixels and clip it to `width` x `height`.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clip(face: &BoundingBox, width: u32, height: u32) -> Option<Self> {
        if !(face.x.is_finite() && face.y.is_finite() && face.width.is_finite() && face.height.is_finite()) {
            return None;
        }
        let x0 = (face.x.round() as i64).clamp(0, width as i64);
        let y0 = (face.y.round() as i64).clamp(0, height as i64);
        let x1 = ((face.x + face.width).round() as i64).clamp(0, width as i64);
        let y1 = ((face.y + face.height).round() as i64).clamp(0, height as i64);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// Locate the face in `image` and normalize it to a [`FaceCrop`].
///
/// Takes the first detection in the detector's order. With SCRFD that is
/// the most confident face, but nothing here re-ranks the list.
pub fn localize(detector: &mut dyn FaceDetect, image: &RawImage) -> Result<FaceCrop, LocalizeError> {
    let faces = detector.detect(image)?;
    let face = faces.first().ok_or(LocalizeError::NoFaceDetected)?;

    if faces.len() > 1 {
        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            "multiple faces detected, using the first"
        );
    }

    let rect = CropRect::clip(face, image.width(), image.height()).ok_or(LocalizeError::NoFaceDetected)?;
    normalize_face(image.as_rgb(), rect)
}

/// Crop `rect` out of `rgb`, resize bilinearly to 128x128 and convert to gray.
///
/// Resizing blends only the 2x2 neighbourhood of each sample, so shrinking a
/// large face keeps its fine texture instead of low-pass filtering it.
pub fn normalize_face(rgb: &RgbImage, rect: CropRect) -> Result<FaceCrop, LocalizeError> {
    let face = imageops::crop_imm(rgb, rect.x, rect.y, rect.width, rect.height).to_image();
    let resized = resize::resize_rgb(&face, FACE_SIZE, FACE_SIZE);
    Ok(FaceCrop::from_gray(to_gray(&resized))?)
}

/// BT.601 luma: 0.299 R + 0.587 G + 0.114 B, rounded to nearest.
pub fn to_gray(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetect for FixedDetector {
        fn detect(&mut self, _image: &RawImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_clip_inside() {
        let rect = CropRect::clip(&bbox(10.2, 20.6, 30.0, 40.0), 100, 100).unwrap();
        assert_eq!(rect, CropRect { x: 10, y: 21, width: 30, height: 40 });
    }

    #[test]
    fn test_clip_overhanging_box() {
        let rect = CropRect::clip(&bbox(-10.0, -5.0, 50.0, 200.0), 100, 80).unwrap();
        assert_eq!(rect, CropRect { x: 0, y: 0, width: 40, height: 80 });
    }

    #[test]
    fn test_clip_outside_is_none() {
        assert!(CropRect::clip(&bbox(150.0, 0.0, 20.0, 20.0), 100, 100).is_none());
        assert!(CropRect::clip(&bbox(10.0, 10.0, 0.0, 20.0), 100, 100).is_none());
        assert!(CropRect::clip(&bbox(f32::NAN, 10.0, 5.0, 5.0), 100, 100).is_none());
    }

    #[test]
    fn test_gray_weights() {
        let rgb = RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));
        assert_eq!(to_gray(&rgb).get_pixel(0, 0).0, [76]);
        let rgb = RgbImage::from_pixel(1, 1, image::Rgb([0, 255, 0]));
        assert_eq!(to_gray(&rgb).get_pixel(0, 0).0, [150]);
        let rgb = RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 255]));
        assert_eq!(to_gray(&rgb).get_pixel(0, 0).0, [29]);
    }

    #[test]
    fn test_normalize_face_halves_without_smoothing() {
        // Stripes of period 4 (0, 60, 120, 180) shrunk 2x: every output
        // column averages exactly two source columns.
        let rgb = RgbImage::from_fn(256, 256, |x, _| {
            let v = (x % 4 * 60) as u8;
            image::Rgb([v, v, v])
        });
        let rect = CropRect { x: 0, y: 0, width: 256, height: 256 };
        let crop = normalize_face(&rgb, rect).unwrap();
        for (x, _, px) in crop.as_gray().enumerate_pixels() {
            let expected = if x % 2 == 0 { 30 } else { 150 };
            assert_eq!(px.0[0], expected, "column {x}");
        }
    }

    #[test]
    fn test_localize_no_face() {
        let image = RawImage::filled(64, 64, [0, 0, 0]).unwrap();
        let err = localize(&mut FixedDetector(vec![]), &image).unwrap_err();
        assert!(matches!(err, LocalizeError::NoFaceDetected));
    }

    #[test]
    fn test_localize_crop_is_fixed_size_for_any_input() {
        for (w, h) in [(64, 48), (640, 480), (131, 997)] {
            let image = RawImage::filled(w, h, [90, 120, 200]).unwrap();
            let mut detector = FixedDetector(vec![bbox(3.0, 5.0, w as f32 / 2.0, h as f32 / 2.0)]);
            let crop = localize(&mut detector, &image).unwrap();
            assert_eq!(crop.as_gray().dimensions(), (FACE_SIZE, FACE_SIZE));
        }
    }

    #[test]
    fn test_localize_uses_first_detection() {
        // Left half dark, right half bright; the first box covers the bright half.
        let image = RawImage::from_rgb(RgbImage::from_fn(200, 100, |x, _| {
            if x < 100 { image::Rgb([0, 0, 0]) } else { image::Rgb([255, 255, 255]) }
        }))
        .unwrap();
        let mut detector = FixedDetector(vec![bbox(100.0, 0.0, 100.0, 100.0), bbox(0.0, 0.0, 100.0, 100.0)]);
        let crop = localize(&mut detector, &image).unwrap();
        assert!(crop.as_gray().pixels().all(|p| p.0[0] == 255));
    }
}
