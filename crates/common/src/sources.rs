use crate::validation::{validate_length, validate_locator, MAX_LOCATOR_LENGTH};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Extensions decoded as a still image rather than a video
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
  /// RTSP/HTTP camera or any URL ffmpeg can open
  LiveStream,
  /// A single image replayed forever
  StaticImage,
  /// A video file on disk
  File,
}

impl SourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceKind::LiveStream => "live-stream",
      SourceKind::StaticImage => "static-image",
      SourceKind::File => "file",
    }
  }

  /// Pick the kind for an uploaded or configured file by its extension
  pub fn for_path(path: &Path) -> SourceKind {
    if has_image_extension(path) {
      SourceKind::StaticImage
    } else {
      SourceKind::File
    }
  }
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for SourceKind {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().replace('_', "-").as_str() {
      "live-stream" | "live" | "stream" | "rtsp" => Ok(SourceKind::LiveStream),
      "static-image" | "image" => Ok(SourceKind::StaticImage),
      "file" | "video" => Ok(SourceKind::File),
      other => Err(anyhow!("unknown source kind '{}'", other)),
    }
  }
}

/// Which media the streaming worker reads from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDescriptor {
  pub kind: SourceKind,
  pub locator: String,
}

impl SourceDescriptor {
  pub fn new(kind: SourceKind, locator: impl Into<String>) -> Self {
    Self {
      kind,
      locator: locator.into(),
    }
  }

  pub fn live_stream(locator: impl Into<String>) -> Self {
    Self::new(SourceKind::LiveStream, locator)
  }

  pub fn static_image(locator: impl Into<String>) -> Self {
    Self::new(SourceKind::StaticImage, locator)
  }

  pub fn file(locator: impl Into<String>) -> Self {
    Self::new(SourceKind::File, locator)
  }

  pub fn validate(&self) -> Result<()> {
    validate_locator(&self.locator, "locator")?;
    validate_length(&self.locator, MAX_LOCATOR_LENGTH, "locator")?;

    if self.kind == SourceKind::StaticImage && !has_image_extension(Path::new(&self.locator)) {
      return Err(anyhow!(
        "static-image locator must end in one of: {}",
        IMAGE_EXTENSIONS.join(", ")
      ));
    }

    Ok(())
  }
}

impl fmt::Display for SourceDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.locator)
  }
}

/// Answer to a source change; `generation` counts swaps since start-up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceUpdateResponse {
  pub source: SourceDescriptor,
  pub generation: u64,
}

fn has_image_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_serde_names() {
    let descriptor = SourceDescriptor::live_stream("rtsp://camera.local/stream");
    let json = serde_json::to_value(&descriptor).unwrap();
    assert_eq!(json["kind"], "live-stream");

    let parsed: SourceDescriptor =
      serde_json::from_str(r#"{"kind":"static-image","locator":"gate.jpg"}"#).unwrap();
    assert_eq!(parsed, SourceDescriptor::static_image("gate.jpg"));
  }

  #[test]
  fn test_kind_from_str() {
    assert_eq!("live_stream".parse::<SourceKind>().unwrap(), SourceKind::LiveStream);
    assert_eq!("IMAGE".parse::<SourceKind>().unwrap(), SourceKind::StaticImage);
    assert_eq!("file".parse::<SourceKind>().unwrap(), SourceKind::File);
    assert!("webcam".parse::<SourceKind>().is_err());
  }

  #[test]
  fn test_kind_for_path() {
    assert_eq!(SourceKind::for_path(Path::new("uploads/car.PNG")), SourceKind::StaticImage);
    assert_eq!(SourceKind::for_path(Path::new("uploads/clip.mp4")), SourceKind::File);
    assert_eq!(SourceKind::for_path(Path::new("noext")), SourceKind::File);
  }

  #[test]
  fn test_validate() {
    assert!(SourceDescriptor::file("video.mp4").validate().is_ok());
    assert!(SourceDescriptor::static_image("gate.jpeg").validate().is_ok());

    assert!(SourceDescriptor::file("   ").validate().is_err());
    assert!(SourceDescriptor::static_image("clip.mp4").validate().is_err());
    assert!(SourceDescriptor::live_stream("rtsp://cam;rm -rf /").validate().is_err());
  }
}
