//! Inference adapter: both models sit behind the same `image -> detections`
//! contract so the pipeline never sees model-specific output shapes.

pub mod yolo;

use common::detections::{BoundingBox, Detection};
use image::RgbImage;
use thiserror::Error;

pub use yolo::{OnnxYoloDetector, YoloConfig, YoloLayout};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("inference failed: {0}")]
    Run(String),

    #[error("unexpected model output: {0}")]
    Output(String),
}

/// A model that localises objects in an image.
///
/// Calls are synchronous and blocking. Implementations surface whatever the
/// model returns; an image with nothing in it yields an empty list.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, InferenceError>;

    /// Short stage name used in logs and metrics
    fn name(&self) -> &str;
}

/// Cut a detection out of the frame, clipped to the frame bounds.
/// Returns `None` for boxes that fall outside the image or have no area.
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x, y, width, height) = bbox.clip_to(image.width(), image.height())?;
    Some(image::imageops::crop_imm(image, x, y, width, height).to_image())
}
