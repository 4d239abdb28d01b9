//! Video files and live streams decoded by an `ffmpeg` child process that
//! writes raw `rgb24` frames to its stdout.

use super::{FrameSource, ReadInterrupt, SourceError};
use anyhow::{bail, Context, Result};
use common::sources::{SourceDescriptor, SourceKind};
use image::RgbImage;
use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Socket timeout for live inputs, in microseconds
const LIVE_IO_TIMEOUT_US: &str = "10000000";

pub struct FfmpegSource {
    descriptor: SourceDescriptor,
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frame_interval: usize,
    buffer: Vec<u8>,
}

impl FfmpegSource {
    pub fn open(descriptor: SourceDescriptor, frame_interval: usize) -> Result<Self, SourceError> {
        let locator = descriptor.locator.clone();
        let (width, height) = probe_frame_dimensions(&descriptor)
            .map_err(|e| SourceError::unavailable(&locator, format!("{:#}", e)))?;

        let child = Command::new("ffmpeg")
            .args(decode_args(&descriptor))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SourceError::unavailable(&locator, format!("failed to spawn ffmpeg: {}", e)))?;

        debug!(
            source = %locator,
            width,
            height,
            frame_interval,
            "ffmpeg decoder started"
        );
        Self::from_child(descriptor, child, (width, height), frame_interval)
    }

    fn from_child(
        descriptor: SourceDescriptor,
        mut child: Child,
        (width, height): (u32, u32),
        frame_interval: usize,
    ) -> Result<Self, SourceError> {
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SourceError::unavailable(&descriptor.locator, "decoder stdout not captured"));
        };

        Ok(Self {
            descriptor,
            child: Arc::new(Mutex::new(child)),
            stdout,
            width,
            height,
            frame_interval: frame_interval.max(1),
            buffer: vec![0; width as usize * height as usize * 3],
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<RgbImage, SourceError> {
        // keep the last of every `frame_interval` decoded frames
        for _ in 0..self.frame_interval {
            if let Err(e) = self.stdout.read_exact(&mut self.buffer) {
                if e.kind() != ErrorKind::UnexpectedEof {
                    warn!(source = %self.descriptor.locator, error = %e, "frame read failed");
                }
                return Err(SourceError::NoMoreFrames);
            }
        }

        RgbImage::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or(SourceError::NoMoreFrames)
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Kills the decoder; the blocked `read_exact` then sees EOF
    fn interrupt(&self) -> Option<ReadInterrupt> {
        let child = Arc::clone(&self.child);
        let locator = self.descriptor.locator.clone();
        Some(ReadInterrupt::new(move || {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            match child.kill() {
                Ok(()) => info!(source = %locator, "ffmpeg decoder interrupted"),
                Err(e) => debug!(source = %locator, error = %e, "ffmpeg decoder already gone"),
            }
        }))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = child.kill();
        let _ = child.wait();
        info!(source = %self.descriptor.locator, "ffmpeg decoder released");
    }
}

/// Transport and timeout options placed before `-i`, shared by ffprobe and
/// ffmpeg so both reach a camera the same way
fn input_args(descriptor: &SourceDescriptor) -> Vec<String> {
    if descriptor.kind != SourceKind::LiveStream {
        return Vec::new();
    }

    let args: &[&str] = if descriptor.locator.starts_with("rtsp://") {
        &["-rtsp_transport", "tcp", "-timeout", LIVE_IO_TIMEOUT_US]
    } else {
        &["-rw_timeout", LIVE_IO_TIMEOUT_US]
    };
    args.iter().map(|s| s.to_string()).collect()
}

fn decode_args(descriptor: &SourceDescriptor) -> Vec<String> {
    let mut args = vec!["-loglevel".to_string(), "error".to_string()];
    args.extend(input_args(descriptor));

    args.extend(
        [
            "-i",
            descriptor.locator.as_str(),
            "-an",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    args
}

fn probe_args(descriptor: &SourceDescriptor) -> Vec<String> {
    let mut args = vec!["-v".to_string(), "error".to_string()];
    args.extend(input_args(descriptor));
    args.extend(
        [
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0",
            descriptor.locator.as_str(),
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

/// Width and height of the first video stream, via ffprobe
pub fn probe_frame_dimensions(descriptor: &SourceDescriptor) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args(probe_args(descriptor))
        .output()
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        bail!("ffprobe failed: {:?}", output.status);
    }

    let output_str =
        String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    parse_dimensions(&output_str)
}

fn parse_dimensions(output: &str) -> Result<(u32, u32)> {
    let line = output.lines().next().unwrap_or_default().trim();
    let Some((width, height)) = line.split_once(',') else {
        bail!("unexpected ffprobe output format: {}", output);
    };

    let width: u32 = width.trim().parse().context("failed to parse width")?;
    let height: u32 = height
        .trim()
        .trim_end_matches(',')
        .parse()
        .context("failed to parse height")?;

    if width == 0 || height == 0 {
        bail!("ffprobe reported empty frame {}x{}", width, height);
    }

    Ok((width, height))
}
