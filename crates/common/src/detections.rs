//! Detection contracts shared by the inference adapter and the pipeline.
//!
//! Both models (plate localisation and character localisation) answer with
//! the same shape: a list of boxes in the pixel space of the image they were
//! given, each carrying a confidence and a discrete class code.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a box from a centre point and extent (YOLO's native encoding)
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Scale both axes independently (model input space -> image space)
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// Intersection over Union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        };

        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle `(x, y, width, height)` clipped to an image of
    /// the given size. Returns `None` when nothing of the box lies inside it.
    pub fn clip_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.floor().clamp(0.0, image_width as f32) as u32;
        let y1 = self.y1.floor().clamp(0.0, image_height as f32) as u32;
        let x2 = self.x2.ceil().clamp(0.0, image_width as f32) as u32;
        let y2 = self.y2.ceil().clamp(0.0, image_height as f32) as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// One model answer: where, how sure, and which class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,

    /// Detection confidence (0.0 to 1.0)
    pub confidence: f32,

    /// Index of the model output class
    pub class_id: usize,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_id: usize) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}
