//! Deterministic stand-ins for the models and media used by the integration
//! tests.

#![allow(dead_code)]

use common::detections::{BoundingBox, Detection};
use common::sources::{SourceDescriptor, SourceKind};
use image::RgbImage;
use lpr_service::inference::{Detector, InferenceError};
use lpr_service::pipeline::{Annotator, CooldownGate, LatestPlateSlot, PlatePipeline};
use lpr_service::recognize::{CharacterMap, PlateFormat, PlateReconstructor, PlateRecognizer};
use lpr_service::source::{FrameSource, SourceError, SourceOpener, StillImageSource};
use lpr_service::store::PlateStore;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PLATE_GLYPHS: [&str; 8] = ["1", "2", "ب", "3", "4", "5", "6", "7"];
pub const PLATE: &str = "67ایران345ب12";

/// Answers every image with whatever it was last told to
pub struct ScriptedDetector {
    name: &'static str,
    detections: Mutex<Vec<Detection>>,
}

impl ScriptedDetector {
    pub fn new(name: &'static str, detections: Vec<Detection>) -> Arc<Self> {
        Arc::new(Self {
            name,
            detections: Mutex::new(detections),
        })
    }

    pub fn set(&self, detections: Vec<Detection>) {
        *self.detections.lock().unwrap() = detections;
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, InferenceError> {
        Ok(self.detections.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// One plate box in the middle of a 160x90 frame
pub fn plate_box() -> Vec<Detection> {
    vec![Detection::new(BoundingBox::new(30.0, 30.0, 130.0, 60.0), 0.92, 0)]
}

/// Character boxes spelling `glyphs` left to right, listed out of order
pub fn characters(glyphs: [&str; 8]) -> Vec<Detection> {
    let map = CharacterMap::persian();
    let mut detections: Vec<Detection> = glyphs
        .iter()
        .enumerate()
        .map(|(i, glyph)| {
            let x = 4.0 + i as f32 * 12.0;
            Detection::new(
                BoundingBox::new(x, 3.0, x + 10.0, 27.0),
                0.88,
                map.code_of(glyph).unwrap(),
            )
        })
        .collect();
    detections.rotate_left(3);
    detections
}

pub struct Models {
    pub plates: Arc<ScriptedDetector>,
    pub chars: Arc<ScriptedDetector>,
}

impl Models {
    /// Models that read `PLATE` on every frame
    pub fn reading_plate() -> Self {
        Self {
            plates: ScriptedDetector::new("plate", plate_box()),
            chars: ScriptedDetector::new("ocr", characters(PLATE_GLYPHS)),
        }
    }

    pub fn recognizer(&self) -> PlateRecognizer {
        PlateRecognizer::new(
            self.plates.clone(),
            self.chars.clone(),
            PlateReconstructor::new(Arc::new(CharacterMap::persian()), PlateFormat::default()),
        )
    }
}

pub fn pipeline(models: &Models, store: Arc<dyn PlateStore>, cooldown: Duration) -> Arc<PlatePipeline> {
    Arc::new(PlatePipeline::new(
        models.recognizer(),
        CooldownGate::new(cooldown),
        store,
        Arc::new(LatestPlateSlot::new()),
        Annotator::new(),
    ))
}

/// A clip of blank frames that ends after `remaining` reads
pub struct Clip {
    descriptor: SourceDescriptor,
    remaining: usize,
}

impl FrameSource for Clip {
    fn read(&mut self) -> Result<RgbImage, SourceError> {
        if self.remaining == 0 {
            return Err(SourceError::NoMoreFrames);
        }
        self.remaining -= 1;
        Ok(RgbImage::new(160, 90))
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}

/// Files are `clip_frames`-frame clips, images are decoded for real and live
/// streams never connect
pub struct TestOpener {
    pub clip_frames: usize,
    pub opened: Mutex<Vec<SourceDescriptor>>,
}

impl TestOpener {
    pub fn new(clip_frames: usize) -> Arc<Self> {
        Arc::new(Self {
            clip_frames,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<SourceDescriptor> {
        self.opened.lock().unwrap().clone()
    }
}

impl SourceOpener for TestOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError> {
        let source: Box<dyn FrameSource> = match descriptor.kind {
            SourceKind::File => Box::new(Clip {
                descriptor: descriptor.clone(),
                remaining: self.clip_frames,
            }),
            SourceKind::StaticImage => Box::new(StillImageSource::open(descriptor.clone())?),
            SourceKind::LiveStream => {
                return Err(SourceError::unavailable(&descriptor.locator, "connection refused"))
            }
        };
        self.opened.lock().unwrap().push(descriptor.clone());
        Ok(source)
    }
}

/// Write a small PNG and return its path as a locator
pub fn write_png(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    RgbImage::from_pixel(160, 90, image::Rgb([40, 40, 40]))
        .save(&path)
        .unwrap();
    path.to_string_lossy().into_owned()
}

/// PNG bytes for multipart uploads
pub fn png_bytes() -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(32, 16, image::Rgb([200, 10, 10]))
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Number of multipart parts in an MJPEG body
pub fn count_parts(body: &[u8]) -> usize {
    let marker = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    body.windows(marker.len()).filter(|w| *w == marker).count()
}
