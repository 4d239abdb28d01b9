use crate::inference::YoloLayout;
use crate::recognize::format::{DEFAULT_GLYPH_COUNT, DEFAULT_PLATE_TEMPLATE};
use crate::recognize::PlateFormat;
use anyhow::{bail, Context, Result};
use common::sources::{SourceDescriptor, SourceKind};
use common::validation::{validate_duration_secs, validate_range};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LprServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: SocketAddr,

    /// Sighting store
    pub database_url: String,

    /// Driver directory used for enrichment and `/search` (optional)
    pub driver_database_url: Option<String>,

    pub plate_model_path: PathBuf,
    pub ocr_model_path: PathBuf,
    pub model_layout: YoloLayout,
    pub model_input_size: u32,
    pub model_confidence: f32,
    pub model_iou: f32,

    /// Glyph table file; the built-in Persian table when unset
    pub charset_path: Option<PathBuf>,
    pub plate_template: String,
    pub plate_glyph_count: usize,

    pub cooldown: Duration,
    pub dedup_window: Duration,

    /// Keep one decoded frame out of every N
    pub frame_interval: usize,
    pub initial_source: SourceDescriptor,
    pub upload_dir: PathBuf,

    pub font_path: Option<PathBuf>,
    pub jpeg_quality: u8,
}

impl LprServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind = env::var("LPR_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8085".to_string());
        let bind_addr: SocketAddr = bind.parse().context("invalid LPR_SERVICE_ADDR")?;

        let source_kind = match env::var("SOURCE_KIND") {
            Ok(kind) => SourceKind::from_str(&kind).context("invalid SOURCE_KIND")?,
            Err(_) => SourceKind::File,
        };
        let source_locator = env::var("SOURCE_LOCATOR").unwrap_or_else(|_| "video.mp4".to_string());

        let model_layout = match env::var("MODEL_LAYOUT") {
            Ok(layout) => layout.parse().context("invalid MODEL_LAYOUT")?,
            Err(_) => YoloLayout::Yolov5,
        };

        let config = Self {
            bind_addr,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://plates.db".to_string()),
            driver_database_url: env::var("DRIVER_DATABASE_URL").ok(),
            plate_model_path: env::var("PLATE_DETECTOR_MODEL")
                .unwrap_or_else(|_| "models/plate_detector.onnx".to_string())
                .into(),
            ocr_model_path: env::var("OCR_MODEL")
                .unwrap_or_else(|_| "models/plate_ocr.onnx".to_string())
                .into(),
            model_layout,
            model_input_size: parse_var("MODEL_INPUT_SIZE", 640)?,
            model_confidence: parse_var("MODEL_CONFIDENCE", 0.25)?,
            model_iou: parse_var("MODEL_IOU", 0.45)?,
            charset_path: env::var("CHARSET_PATH").ok().map(PathBuf::from),
            plate_template: env::var("PLATE_TEMPLATE")
                .unwrap_or_else(|_| DEFAULT_PLATE_TEMPLATE.to_string()),
            plate_glyph_count: parse_var("PLATE_GLYPH_COUNT", DEFAULT_GLYPH_COUNT)?,
            cooldown: Duration::from_secs(parse_var("COOLDOWN_SECS", 10)?),
            dedup_window: Duration::from_secs(parse_var("DEDUP_WINDOW_SECS", 300)?),
            frame_interval: parse_var("FRAME_INTERVAL", 5)?,
            initial_source: SourceDescriptor::new(source_kind, source_locator),
            upload_dir: env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "uploads".to_string())
                .into(),
            font_path: env::var("FONT_PATH").ok().map(PathBuf::from),
            jpeg_quality: parse_var("JPEG_QUALITY", 80)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_duration_secs(self.cooldown.as_secs(), "COOLDOWN_SECS")?;
        if self.dedup_window <= self.cooldown {
            bail!(
                "DEDUP_WINDOW_SECS ({}) must be greater than COOLDOWN_SECS ({})",
                self.dedup_window.as_secs(),
                self.cooldown.as_secs()
            );
        }
        validate_range(self.frame_interval, 1, 1000, "FRAME_INTERVAL")?;
        validate_range(self.jpeg_quality, 1, 100, "JPEG_QUALITY")?;
        validate_range(self.model_input_size, 32, 4096, "MODEL_INPUT_SIZE")?;
        validate_range(self.model_confidence, 0.0, 1.0, "MODEL_CONFIDENCE")?;
        validate_range(self.model_iou, 0.0, 1.0, "MODEL_IOU")?;
        self.plate_format()?;
        self.initial_source
            .validate()
            .context("invalid SOURCE_KIND/SOURCE_LOCATOR")?;
        Ok(())
    }

    pub fn plate_format(&self) -> Result<PlateFormat> {
        PlateFormat::parse(&self.plate_template, self.plate_glyph_count)
            .context("invalid PLATE_TEMPLATE")
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LprServiceConfig {
        LprServiceConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            database_url: "sqlite::memory:".to_string(),
            driver_database_url: None,
            plate_model_path: "plate.onnx".into(),
            ocr_model_path: "ocr.onnx".into(),
            model_layout: YoloLayout::Yolov5,
            model_input_size: 640,
            model_confidence: 0.25,
            model_iou: 0.45,
            charset_path: None,
            plate_template: DEFAULT_PLATE_TEMPLATE.to_string(),
            plate_glyph_count: 8,
            cooldown: Duration::from_secs(10),
            dedup_window: Duration::from_secs(300),
            frame_interval: 5,
            initial_source: SourceDescriptor::file("video.mp4"),
            upload_dir: "uploads".into(),
            font_path: None,
            jpeg_quality: 80,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_dedup_window_must_exceed_cooldown() {
        let mut config = config();
        config.dedup_window = Duration::from_secs(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cooldown_rejected() {
        let mut config = config();
        config.cooldown = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_must_fit_glyph_count() {
        let mut config = config();
        config.plate_glyph_count = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_interval_must_be_positive() {
        let mut config = config();
        config.frame_interval = 0;
        assert!(config.validate().is_err());
    }
}
