// src/capability.rs
//
// Contracts for the external models the engine consumes.
//
// The session works against any detector or recognizer implementing these
// traits. Implementations may fail; the session logs the failure and carries
// on with an empty result for that frame or detection.

use crate::types::{BBox, Detection, Frame, PlateReading};
use image::{GrayImage, Luma, RgbImage};
use tracing::debug;

/// Fraction of the vehicle box height, from the top, above the plate strip.
pub const PLATE_TOP_RATIO: f32 = 0.6;
/// Binarisation cut-off applied before recognition.
pub const PLATE_BINARY_THRESHOLD: u8 = 150;

/// Turns a working-resolution frame into vehicle candidates.
pub trait VehicleDetector: Send {
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> anyhow::Result<Vec<Detection>>;

    /// Detector name (for logging)
    fn name(&self) -> &str;
}

/// Reads text from a binarised plate crop.
pub trait PlateRecognizer: Send {
    fn recognize(&mut self, plate: &GrayImage) -> anyhow::Result<PlateReading>;

    fn name(&self) -> &str;
}

/// Recognizer used when no OCR model is wired in. Always reports nothing legible.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecognizer;

impl PlateRecognizer for NullRecognizer {
    fn recognize(&mut self, _plate: &GrayImage) -> anyhow::Result<PlateReading> {
        Ok(PlateReading::empty())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Lower 40% of the vehicle box, full box width, clipped to the frame.
/// Returns `None` when nothing of the strip lies inside the frame.
pub fn plate_region(frame: &RgbImage, bbox: &BBox) -> Option<RgbImage> {
    let plate_y1 = bbox.y1 + (bbox.height() as f32 * PLATE_TOP_RATIO) as i32;

    let x1 = bbox.x1.clamp(0, frame.width() as i32);
    let x2 = bbox.x2.clamp(0, frame.width() as i32);
    let y1 = plate_y1.clamp(0, frame.height() as i32);
    let y2 = bbox.y2.clamp(0, frame.height() as i32);

    if x2 <= x1 || y2 <= y1 {
        debug!("Empty plate region for {:?}", bbox);
        return None;
    }

    let crop = image::imageops::crop_imm(
        frame,
        x1 as u32,
        y1 as u32,
        (x2 - x1) as u32,
        (y2 - y1) as u32,
    );
    Some(crop.to_image())
}

/// Grayscale then hard threshold: pixels brighter than the cut-off become white.
pub fn binarize_plate(plate: &RgbImage) -> GrayImage {
    let mut gray = image::imageops::grayscale(plate);
    for pixel in gray.pixels_mut() {
        *pixel = if pixel.0[0] > PLATE_BINARY_THRESHOLD {
            Luma([255])
        } else {
            Luma([0])
        };
    }
    gray
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_plate_region_is_lower_forty_percent() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([10, 10, 10]));
        let crop = plate_region(&frame, &BBox::new(100, 100, 300, 200)).unwrap();
        assert_eq!(crop.width(), 200);
        assert_eq!(crop.height(), 40);
    }

    #[test]
    fn test_plate_region_clipped_to_frame() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([10, 10, 10]));
        let crop = plate_region(&frame, &BBox::new(600, 400, 700, 500)).unwrap();
        assert_eq!(crop.width(), 40);
        assert_eq!(crop.height(), 20);
    }

    #[test]
    fn test_plate_region_outside_frame() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([10, 10, 10]));
        assert!(plate_region(&frame, &BBox::new(100, 100, 200, 200)).is_none());
        assert!(plate_region(&frame, &BBox::new(10, 10, 10, 30)).is_none());
    }

    #[test]
    fn test_binarize_plate() {
        let mut plate = RgbImage::from_pixel(4, 1, Rgb([250, 250, 250]));
        plate.put_pixel(0, 0, Rgb([20, 20, 20]));
        let bin = binarize_plate(&plate);
        assert_eq!(bin.get_pixel(0, 0).0[0], 0);
        assert_eq!(bin.get_pixel(3, 0).0[0], 255);
    }

    #[test]
    fn test_null_recognizer_reports_nothing() {
        let mut recognizer = NullRecognizer;
        let reading = recognizer.recognize(&GrayImage::new(10, 4)).unwrap();
        assert!(!reading.is_legible());
        assert_eq!(reading.confidence, 0.0);
    }
}
