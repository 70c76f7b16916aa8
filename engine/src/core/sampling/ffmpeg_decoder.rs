//! FFmpeg Decoding Backend
//!
//! Writes the uploaded bytes to a temporary file, probes it, and streams
//! packed RGB24 frames out of an ffmpeg subprocess.

use std::io::{BufReader, ErrorKind, Read, Write};
use std::process::{Child, ChildStdout};

use image::{DynamicImage, RgbImage};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::decoder::{FrameDecoder, NoFrames, VideoDecoder};
use crate::core::ffmpeg::{detect_system_ffmpeg, FFmpegError, FFmpegRunner};
use crate::core::{CoreError, CoreResult};

/// Video decoder backed by system FFmpeg
#[derive(Clone)]
pub struct FfmpegVideoDecoder {
    runner: FFmpegRunner,
}

impl FfmpegVideoDecoder {
    pub fn new(runner: FFmpegRunner) -> Self {
        Self { runner }
    }

    /// Detects ffmpeg/ffprobe on the system
    pub fn detect() -> CoreResult<Self> {
        let info = detect_system_ffmpeg()?;
        debug!("Using FFmpeg {} at {}", info.version, info.ffmpeg_path.display());
        Ok(Self::new(FFmpegRunner::new(info)))
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn open(&self, video: &[u8]) -> CoreResult<Box<dyn FrameDecoder>> {
        if video.is_empty() {
            return Ok(Box::new(NoFrames));
        }

        let mut input = tempfile::Builder::new()
            .prefix("framequery-upload-")
            .suffix(".video")
            .tempfile()?;
        input.write_all(video)?;
        input.flush()?;

        let stream = self.runner.probe_video(input.path())?;
        if stream.width == 0 || stream.height == 0 {
            return Err(CoreError::Decode(format!(
                "video stream has invalid dimensions {}x{}",
                stream.width, stream.height
            )));
        }

        let mut child = self.runner.spawn_rgb_stream(input.path())?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CoreError::from(FFmpegError::ExecutionFailed(
                "ffmpeg stdout was not captured".to_string(),
            ))
        })?;

        debug!(
            "Opened {} stream {}x{} (rotated {}) @ {:?} fps",
            stream.codec, stream.width, stream.height, stream.rotation, stream.fps
        );

        Ok(Box::new(FfmpegFrameDecoder {
            _input: input,
            child,
            stdout: BufReader::new(stdout),
            width: stream.width,
            height: stream.height,
            fps: stream.fps,
        }))
    }
}

/// Streaming session over one ffmpeg process
struct FfmpegFrameDecoder {
    // Deleted when the session ends.
    _input: NamedTempFile,
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    fps: Option<f64>,
}

impl FfmpegFrameDecoder {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl FrameDecoder for FfmpegFrameDecoder {
    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> CoreResult<Option<DynamicImage>> {
        let mut buf = vec![0u8; self.frame_len()];
        let read = read_full(&mut self.stdout, &mut buf)?;

        if read == 0 {
            return Ok(None);
        }
        if read < buf.len() {
            return Err(CoreError::Decode(format!(
                "truncated frame: got {} of {} bytes",
                read,
                buf.len()
            )));
        }

        let image = RgbImage::from_raw(self.width, self.height, buf).ok_or_else(|| {
            CoreError::Decode("frame buffer does not match stream dimensions".to_string())
        })?;
        Ok(Some(DynamicImage::ImageRgb8(image)))
    }
}

impl Drop for FfmpegFrameDecoder {
    fn drop(&mut self) {
        // Sampling may stop early; don't leave ffmpeg blocked on a full pipe.
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!("Failed to stop ffmpeg: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}

/// Reads until `buf` is full or EOF; returns the number of bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
