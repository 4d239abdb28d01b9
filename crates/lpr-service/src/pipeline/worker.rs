//! One streaming loop per connected viewer: read, process, encode, emit.

use super::PlatePipeline;
use crate::source::{FrameSource, ReadInterrupt, SourceError, SourceOpener, SourceSlot};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use common::sources::SourceDescriptor;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};
use std::sync::Arc;
use telemetry::metrics::LPR_ACTIVE_FEEDS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const MJPEG_BOUNDARY: &str = "frame";

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Why a feed stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    /// The source could not be opened
    Unavailable,
    /// The source ran out of frames
    Exhausted,
    /// The viewer went away
    Disconnected,
    /// The service is shutting down
    Cancelled,
    /// Misconfiguration or a crashed task; later frames would fail too
    Failed,
}

/// Wrap one JPEG in its multipart envelope
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(MJPEG_BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(frame)?;
    Ok(out)
}

struct ActiveFeed;

impl ActiveFeed {
    fn start() -> Self {
        LPR_ACTIVE_FEEDS.inc();
        Self
    }
}

impl Drop for ActiveFeed {
    fn drop(&mut self) {
        LPR_ACTIVE_FEEDS.dec();
    }
}

pub struct FeedWorker {
    sources: Arc<SourceSlot>,
    opener: Arc<dyn SourceOpener>,
    pipeline: Arc<PlatePipeline>,
    jpeg_quality: u8,
    cancel: CancellationToken,
}

impl FeedWorker {
    pub fn new(
        sources: Arc<SourceSlot>,
        opener: Arc<dyn SourceOpener>,
        pipeline: Arc<PlatePipeline>,
        jpeg_quality: u8,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sources,
            opener,
            pipeline,
            jpeg_quality,
            cancel,
        }
    }

    /// Stream multipart frames into `frames` until the source ends, the
    /// receiver is dropped or the token is cancelled. The capture is released
    /// before this returns.
    pub async fn run(self, frames: mpsc::Sender<Bytes>) -> FeedEnd {
        let _active = ActiveFeed::start();
        let end = self.stream(&frames).await;
        info!(end = ?end, "video feed stopped");
        end
    }

    async fn stream(&self, frames: &mpsc::Sender<Bytes>) -> FeedEnd {
        let (mut generation, descriptor) = self.sources.current().await;
        let mut source = match self.open(descriptor).await {
            Ok(source) => source,
            Err(end) => return end,
        };

        loop {
            if self.cancel.is_cancelled() {
                return FeedEnd::Cancelled;
            }
            if frames.is_closed() {
                return FeedEnd::Disconnected;
            }

            let latest = self.sources.generation().await;
            if latest != generation {
                // release the old capture before opening its replacement
                drop(source);
                let (next, descriptor) = self.sources.current().await;
                generation = next;
                source = match self.open(descriptor).await {
                    Ok(source) => source,
                    Err(end) => return end,
                };
            }

            let interrupt = source.interrupt();
            let mut reader = tokio::task::spawn_blocking(move || {
                let frame = source.read();
                (source, frame)
            });
            let read = tokio::select! {
                read = &mut reader => read,
                _ = self.cancel.cancelled() => {
                    return abandon_read(reader, interrupt, FeedEnd::Cancelled).await;
                }
                _ = frames.closed() => {
                    return abandon_read(reader, interrupt, FeedEnd::Disconnected).await;
                }
            };
            let frame = match read {
                Ok((returned, frame)) => {
                    source = returned;
                    frame
                }
                Err(e) => {
                    error!(error = %e, "frame reader crashed");
                    return FeedEnd::Failed;
                }
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(SourceError::NoMoreFrames) => {
                    debug!(source = %source.descriptor(), "source exhausted");
                    return FeedEnd::Exhausted;
                }
                Err(e) => {
                    error!(error = %e, "source failed");
                    return FeedEnd::Unavailable;
                }
            };

            let processed = match self.pipeline.process(frame, Utc::now()).await {
                Ok(processed) => processed,
                Err(e) => {
                    error!(error = %e, "stopping video feed");
                    return FeedEnd::Failed;
                }
            };

            let quality = self.jpeg_quality;
            let encoded =
                tokio::task::spawn_blocking(move || encode_jpeg(&processed.frame, quality)).await;
            let part = match encoded {
                Ok(Ok(jpeg)) => mjpeg_part(&jpeg),
                Ok(Err(e)) => {
                    warn!(error = %e, "failed to encode frame, skipping");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "frame encoder crashed");
                    return FeedEnd::Failed;
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return FeedEnd::Cancelled,
                sent = frames.send(part) => {
                    if sent.is_err() {
                        return FeedEnd::Disconnected;
                    }
                }
            }
        }
    }

    async fn open(&self, descriptor: SourceDescriptor) -> Result<Box<dyn FrameSource>, FeedEnd> {
        let opener = Arc::clone(&self.opener);
        match tokio::task::spawn_blocking(move || opener.open(&descriptor)).await {
            Ok(Ok(source)) => Ok(source),
            Ok(Err(e)) => {
                error!(error = %e, "cannot open video source");
                Err(FeedEnd::Unavailable)
            }
            Err(e) => {
                error!(error = %e, "source opener crashed");
                Err(FeedEnd::Failed)
            }
        }
    }
}

/// Stop waiting on a read that outlived its feed. With an interrupt the
/// read is unblocked and the source dropped before returning; without one
/// the source is dropped whenever the read finishes.
async fn abandon_read(
    reader: JoinHandle<(Box<dyn FrameSource>, Result<RgbImage, SourceError>)>,
    interrupt: Option<ReadInterrupt>,
    end: FeedEnd,
) -> FeedEnd {
    let Some(interrupt) = interrupt else {
        warn!(end = ?end, "source read cannot be interrupted, releasing it in the background");
        return end;
    };

    interrupt.fire();
    if let Err(e) = reader.await {
        error!(error = %e, "frame reader crashed");
    }
    end
}
