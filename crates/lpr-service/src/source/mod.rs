//! Source provider: turns the configured `SourceDescriptor` into a readable
//! sequence of RGB frames.

pub mod ffmpeg;
pub mod still;

use anyhow::Result;
use common::sources::{SourceDescriptor, SourceKind};
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

pub use ffmpeg::FfmpegSource;
pub use still::StillImageSource;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The locator could not be opened; the feed emits nothing
    #[error("source '{locator}' unavailable: {reason}")]
    Unavailable { locator: String, reason: String },

    /// End of file, or the stream broke; the feed ends cleanly
    #[error("no more frames")]
    NoMoreFrames,
}

impl SourceError {
    pub fn unavailable(locator: &str, reason: impl ToString) -> Self {
        SourceError::Unavailable {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Unblocks a read in progress on another thread. After it fires the
/// pending read, and every later one, fails with `NoMoreFrames`.
#[derive(Clone)]
pub struct ReadInterrupt(Arc<dyn Fn() + Send + Sync>);

impl ReadInterrupt {
    pub fn new(interrupt: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(interrupt))
    }

    pub fn fire(&self) {
        (self.0)()
    }
}

impl fmt::Debug for ReadInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadInterrupt")
    }
}

/// An open source. Reads block until a frame is decoded.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<RgbImage, SourceError>;

    fn descriptor(&self) -> &SourceDescriptor;

    /// Handle that aborts a blocked `read`. Sources whose reads always
    /// return promptly have none.
    fn interrupt(&self) -> Option<ReadInterrupt> {
        None
    }
}

/// Opens descriptors into frame sources
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Opens real media: still images with `image`, everything else through ffmpeg
#[derive(Debug, Clone)]
pub struct MediaOpener {
    frame_interval: usize,
}

impl MediaOpener {
    /// `frame_interval` of N keeps one decoded frame out of every N
    pub fn new(frame_interval: usize) -> Self {
        Self {
            frame_interval: frame_interval.max(1),
        }
    }
}

impl Default for MediaOpener {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SourceOpener for MediaOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, SourceError> {
        let source: Box<dyn FrameSource> = match descriptor.kind {
            SourceKind::StaticImage => Box::new(StillImageSource::open(descriptor.clone())?),
            SourceKind::LiveStream | SourceKind::File => {
                Box::new(FfmpegSource::open(descriptor.clone(), self.frame_interval)?)
            }
        };
        info!(kind = %descriptor.kind, locator = %descriptor.locator, "source opened");
        Ok(source)
    }
}

/// The active descriptor plus a generation bumped on every swap.
///
/// Workers compare generations between reads; a frame read in progress always
/// finishes on the handle it started on.
#[derive(Debug)]
pub struct SourceSlot {
    inner: RwLock<(u64, SourceDescriptor)>,
}

impl SourceSlot {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            inner: RwLock::new((0, descriptor)),
        }
    }

    pub async fn current(&self) -> (u64, SourceDescriptor) {
        self.inner.read().await.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.inner.read().await.0
    }

    /// Validate and swap in a new descriptor, returning its generation
    pub async fn configure(&self, descriptor: SourceDescriptor) -> Result<u64> {
        descriptor.validate()?;
        let mut slot = self.inner.write().await;
        slot.0 += 1;
        slot.1 = descriptor;
        info!(
            kind = %slot.1.kind,
            locator = %slot.1.locator,
            generation = slot.0,
            "source reconfigured"
        );
        Ok(slot.0)
    }
}
