//! Plate reading: localise plates in a frame, read the characters of each
//! crop and rebuild the plate string.

pub mod charset;
pub mod format;
pub mod reconstruct;

use crate::inference::{crop, Detector, InferenceError};
use common::detections::BoundingBox;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

pub use charset::{CharacterMap, CharsetError};
pub use format::PlateFormat;
pub use reconstruct::{FormattedPlate, PlateReconstructor, Reconstruction};

#[derive(Debug, Error)]
pub enum RecognizeError {
    /// A model failed; the frame is emitted without annotation
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// The glyph table does not cover the character model's classes
    #[error(transparent)]
    Charset(#[from] CharsetError),
}

/// One plate region found in a frame and what could be read from it
#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    pub bbox: BoundingBox,
    pub reconstruction: Reconstruction,
}

#[derive(Clone)]
pub struct PlateRecognizer {
    plate_detector: Arc<dyn Detector>,
    char_detector: Arc<dyn Detector>,
    reconstructor: PlateReconstructor,
}

impl PlateRecognizer {
    pub fn new(
        plate_detector: Arc<dyn Detector>,
        char_detector: Arc<dyn Detector>,
        reconstructor: PlateReconstructor,
    ) -> Self {
        Self {
            plate_detector,
            char_detector,
            reconstructor,
        }
    }

    pub fn reconstructor(&self) -> &PlateReconstructor {
        &self.reconstructor
    }

    /// Run both models over a frame. Blocking.
    pub fn recognize(&self, frame: &RgbImage) -> Result<Vec<PlateReading>, RecognizeError> {
        let plates = self.plate_detector.detect(frame)?;
        let mut readings = Vec::with_capacity(plates.len());

        for plate in plates {
            let Some(region) = crop(frame, &plate.bbox) else {
                tracing::debug!(bbox = ?plate.bbox, "plate box outside frame, skipping");
                continue;
            };

            let characters = self.char_detector.detect(&region)?;
            let reconstruction = self.reconstructor.reconstruct(&characters)?;
            if let Reconstruction::Rejected { found, expected } = &reconstruction {
                tracing::debug!(found, expected, "plate characters rejected");
            }

            readings.push(PlateReading {
                bbox: plate.bbox,
                reconstruction,
            });
        }

        Ok(readings)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use common::detections::Detection;

    fn recognizer(
        plates: Arc<FixedDetector>,
        chars: Arc<FixedDetector>,
    ) -> PlateRecognizer {
        PlateRecognizer::new(
            plates,
            chars,
            PlateReconstructor::new(Arc::new(CharacterMap::persian()), PlateFormat::default()),
        )
    }

    #[test]
    fn test_reads_each_plate() {
        let map = CharacterMap::persian();
        let plates = Arc::new(FixedDetector::new(
            "plate",
            vec![
                Detection::new(BoundingBox::new(10.0, 10.0, 110.0, 40.0), 0.9, 0),
                Detection::new(BoundingBox::new(200.0, 10.0, 300.0, 40.0), 0.8, 0),
            ],
        ));
        let chars = Arc::new(FixedDetector::new(
            "ocr",
            plate_characters(&map, ["1", "2", "ب", "3", "4", "5", "6", "7"]),
        ));

        let readings = recognizer(plates, chars.clone())
            .recognize(&RgbImage::new(320, 240))
            .unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(chars.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(
            readings[0].reconstruction.candidate().unwrap().as_str(),
            "67ایران345ب12"
        );
    }

    #[test]
    fn test_no_plates_is_empty() {
        let plates = Arc::new(FixedDetector::new("plate", vec![]));
        let chars = Arc::new(FixedDetector::new("ocr", vec![]));

        let readings = recognizer(plates, chars.clone())
            .recognize(&RgbImage::new(64, 64))
            .unwrap();
        assert!(readings.is_empty());
        assert_eq!(chars.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plate_outside_frame_is_skipped() {
        let plates = Arc::new(FixedDetector::new(
            "plate",
            vec![Detection::new(BoundingBox::new(500.0, 500.0, 600.0, 540.0), 0.9, 0)],
        ));
        let chars = Arc::new(FixedDetector::new("ocr", vec![]));

        let readings = recognizer(plates, chars)
            .recognize(&RgbImage::new(64, 64))
            .unwrap();
        assert!(readings.is_empty());
    }

    #[test]
    fn test_model_failure_surfaces_as_inference_error() {
        let plates = Arc::new(FixedDetector::failing("plate", "device lost"));
        let chars = Arc::new(FixedDetector::new("ocr", vec![]));

        let result = recognizer(plates, chars).recognize(&RgbImage::new(64, 64));
        assert!(matches!(result, Err(RecognizeError::Inference(_))));
    }
}
