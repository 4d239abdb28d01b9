use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use common::detections::BoundingBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draws recorded plates onto the outgoing frame
#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
}

impl Annotator {
    /// Boxes only; plate text needs a font that covers its script
    pub fn new() -> Self {
        Self {
            font: None,
            scale: PxScale::from(24.0),
        }
    }

    pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(data)
            .with_context(|| format!("invalid font file {}", path.display()))?;
        Ok(Self {
            font: Some(font),
            ..Self::new()
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw_plate(&self, frame: &mut RgbImage, bbox: &BoundingBox, label: &str) {
        let Some((x, y, width, height)) = bbox.clip_to(frame.width(), frame.height()) else {
            return;
        };

        let (x, y) = (x as i32, y as i32);
        draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(width, height), BOX_COLOR);
        // second outline for a 2px border
        if width > 2 && height > 2 {
            draw_hollow_rect_mut(
                frame,
                Rect::at(x + 1, y + 1).of_size(width - 2, height - 2),
                BOX_COLOR,
            );
        }

        if let Some(font) = &self.font {
            let text_y = (y - self.scale.y as i32 - 4).max(0);
            draw_text_mut(frame, BOX_COLOR, x, text_y, self.scale, font, label);
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draws_box_outline() {
        let mut frame = RgbImage::new(100, 100);
        Annotator::new().draw_plate(&mut frame, &BoundingBox::new(10.0, 20.0, 60.0, 50.0), "12ب345");

        assert_eq!(frame.get_pixel(10, 20), &BOX_COLOR);
        assert_eq!(frame.get_pixel(11, 21), &BOX_COLOR);
        assert_eq!(frame.get_pixel(30, 35), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_outside_frame_is_ignored() {
        let mut frame = RgbImage::new(50, 50);
        Annotator::new().draw_plate(&mut frame, &BoundingBox::new(80.0, 80.0, 90.0, 90.0), "x");
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_missing_font_file_is_an_error() {
        assert!(Annotator::with_font_file("/nonexistent/font.ttf").is_err());
    }
}
