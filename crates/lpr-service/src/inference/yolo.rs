//! YOLO detector backed by ONNX Runtime.
//!
//! Serves both the plate localiser and the character localiser. The session
//! is created on the first `detect` call and kept for the life of the process.
//! Decoding of the raw head (confidence cut and per-class NMS) belongs to the
//! exported model, so it lives here and not in the pipeline.

use super::{Detector, InferenceError};
use common::detections::{BoundingBox, Detection};
use image::RgbImage;
use ndarray::{Array, ArrayView3, IxDyn};
use once_cell::sync::OnceCell;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::Instant;

/// Layout of the model's output head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YoloLayout {
    /// `[1, predictions, 5 + classes]`: box, objectness, class scores
    Yolov5,
    /// `[1, 4 + classes, predictions]`: box, class scores
    Yolov8,
}

impl std::str::FromStr for YoloLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "yolov5" | "v5" => Ok(YoloLayout::Yolov5),
            "yolov8" | "v8" => Ok(YoloLayout::Yolov8),
            other => Err(anyhow::anyhow!("unknown model layout '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoloConfig {
    /// Path to the ONNX model file
    pub model_path: String,

    #[serde(default = "default_layout")]
    pub layout: YoloLayout,

    /// Model input size (width and height)
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Confidence threshold applied while decoding the head
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// IoU threshold for NMS
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Maximum number of detections per image
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Name of the output tensor
    #[serde(default = "default_output_name")]
    pub output_name: String,

    /// Number of intra-operation threads
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_layout() -> YoloLayout {
    YoloLayout::Yolov5
}

fn default_input_size() -> u32 {
    640
}

fn default_confidence() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_max_detections() -> usize {
    100
}

fn default_output_name() -> String {
    "output0".to_string()
}

fn default_intra_threads() -> usize {
    4
}

impl YoloConfig {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            layout: default_layout(),
            input_size: default_input_size(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            output_name: default_output_name(),
            intra_threads: default_intra_threads(),
        }
    }
}

pub struct OnnxYoloDetector {
    name: String,
    config: YoloConfig,
    session: OnceCell<Mutex<Session>>,
}

impl OnnxYoloDetector {
    pub fn new(name: impl Into<String>, config: YoloConfig) -> Self {
        Self {
            name: name.into(),
            config,
            session: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &YoloConfig {
        &self.config
    }

    /// Whether the model has been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.session.get().is_some()
    }

    fn session(&self) -> Result<&Mutex<Session>, InferenceError> {
        self.session.get_or_try_init(|| {
            tracing::info!(
                model = %self.name,
                path = %self.config.model_path,
                "loading model"
            );
            let session = Session::builder()
                .map_err(|e| self.load_error(e))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| self.load_error(e))?
                .with_intra_threads(self.config.intra_threads)
                .map_err(|e| self.load_error(e))?
                .commit_from_file(&self.config.model_path)
                .map_err(|e| self.load_error(e))?;
            Ok(Mutex::new(session))
        })
    }

    fn load_error(&self, reason: impl ToString) -> InferenceError {
        InferenceError::Load {
            path: self.config.model_path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Resize to the model input and convert to normalised NCHW
    fn preprocess(&self, image: &RgbImage) -> Array<f32, IxDyn> {
        let size = self.config.input_size;
        let resized =
            image::imageops::resize(image, size, size, image::imageops::FilterType::Triangle);

        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] = pixel[channel] as f32 / 255.0;
            }
        }
        input
    }
}

impl Detector for OnnxYoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, InferenceError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let session_lock = self.session()?;
        let input = Tensor::from_array(self.preprocess(image))
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let started = Instant::now();
        let mut session = session_lock
            .lock()
            .map_err(|e| InferenceError::Run(format!("session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let output = outputs.get(self.config.output_name.as_str()).ok_or_else(|| {
            InferenceError::Output(format!("no output tensor '{}'", self.config.output_name))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(e.to_string()))?;
        let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

        telemetry::metrics::LPR_INFERENCE_TIME
            .with_label_values(&[self.name.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let scale_x = image.width() as f32 / self.config.input_size as f32;
        let scale_y = image.height() as f32 / self.config.input_size as f32;
        decode(&self.config, &shape, data, scale_x, scale_y)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Decode a raw YOLO head into detections in image pixel space
pub fn decode(
    config: &YoloConfig,
    shape: &[usize],
    data: &[f32],
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<Detection>, InferenceError> {
    let dims: [usize; 3] = match shape {
        [1, a, b] => [1, *a, *b],
        other => {
            return Err(InferenceError::Output(format!(
                "expected [1, _, _] output, got {:?}",
                other
            )))
        }
    };
    let output = ArrayView3::from_shape(dims, data)
        .map_err(|e| InferenceError::Output(e.to_string()))?;

    let (num_predictions, attributes) = match config.layout {
        YoloLayout::Yolov5 => (dims[1], dims[2]),
        YoloLayout::Yolov8 => (dims[2], dims[1]),
    };
    let class_offset = match config.layout {
        YoloLayout::Yolov5 => 5,
        YoloLayout::Yolov8 => 4,
    };
    if attributes <= class_offset {
        return Err(InferenceError::Output(format!(
            "output has {} attributes per prediction, need more than {}",
            attributes, class_offset
        )));
    }

    let value = |prediction: usize, attribute: usize| match config.layout {
        YoloLayout::Yolov5 => output[[0, prediction, attribute]],
        YoloLayout::Yolov8 => output[[0, attribute, prediction]],
    };

    let mut candidates = Vec::new();
    for i in 0..num_predictions {
        let objectness = match config.layout {
            YoloLayout::Yolov5 => value(i, 4),
            YoloLayout::Yolov8 => 1.0,
        };

        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for class_idx in 0..attributes - class_offset {
            let score = value(i, class_offset + class_idx);
            if score > best_score {
                best_score = score;
                best_class = class_idx;
            }
        }

        let confidence = objectness * best_score;
        if confidence < config.confidence_threshold {
            continue;
        }

        let bbox = BoundingBox::from_center(value(i, 0), value(i, 1), value(i, 2), value(i, 3))
            .scale(scale_x, scale_y);
        candidates.push(Detection::new(bbox, confidence, best_class));
    }

    let mut kept = nms(candidates, config.iou_threshold);
    kept.truncate(config.max_detections);
    Ok(kept)
}

/// Per-class Non-Maximum Suppression, highest confidence first
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) >= iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
