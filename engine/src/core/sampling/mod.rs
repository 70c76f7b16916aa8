//! Frame Sampling Module
//!
//! Decodes a video and keeps a temporally uniform subset of its frames.
//! Frames are pulled from the decoder one at a time, so memory use is bounded
//! by a single decoded frame regardless of video length.

mod decoder;
mod ffmpeg_decoder;
mod stride;

pub use decoder::{FrameDecoder, NoFrames, VideoDecoder};
pub use ffmpeg_decoder::FfmpegVideoDecoder;
pub use stride::{SamplingStride, ASSUMED_FRAME_RATE};

use image::RgbImage;
use tracing::{debug, warn};

use crate::core::{CoreResult, TimeSec};

// =============================================================================
// Sampled Frame
// =============================================================================

/// A kept frame, normalized to RGB channel order
#[derive(Clone, Debug)]
pub struct SampledFrame {
    /// Position in sampling order, starting at 0
    pub seq: usize,
    /// Index of the frame in the decoded stream
    pub source_index: u64,
    /// Presentation time derived from the frame rate
    pub timestamp_sec: TimeSec,
    pub image: RgbImage,
}

// =============================================================================
// Frame Sampler
// =============================================================================

/// Keeps one frame per stride step
#[derive(Clone, Debug, Default)]
pub struct FrameSampler {
    stride: SamplingStride,
}

impl FrameSampler {
    pub fn new(stride: SamplingStride) -> Self {
        Self { stride }
    }

    pub fn stride(&self) -> SamplingStride {
        self.stride
    }

    /// Opens `video` and returns a lazy iterator over the sampled frames.
    ///
    /// Fails only if the container cannot be opened. Empty input, or a video
    /// with no decodable frames, yields an empty iterator.
    pub fn sample(&self, decoder: &dyn VideoDecoder, video: &[u8]) -> CoreResult<SampledFrames> {
        let session: Box<dyn FrameDecoder> = if video.is_empty() {
            Box::new(NoFrames)
        } else {
            decoder.open(video)?
        };
        let fps = session.frame_rate();
        let step = self.stride.step(fps);

        debug!(
            "Sampling with {} decoder: fps={:?}, step={}",
            decoder.name(),
            fps,
            step
        );

        Ok(SampledFrames {
            session,
            step,
            fps: fps
                .filter(|f| f.is_finite() && *f > 0.0)
                .unwrap_or(ASSUMED_FRAME_RATE),
            next_index: 0,
            next_seq: 0,
            done: false,
        })
    }
}

/// Iterator over sampled frames of one decoding session
pub struct SampledFrames {
    session: Box<dyn FrameDecoder>,
    step: u64,
    fps: f64,
    next_index: u64,
    next_seq: usize,
    done: bool,
}

impl SampledFrames {
    /// Number of decoded frames between kept frames
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Number of frames decoded so far (kept or not)
    pub fn decoded_count(&self) -> u64 {
        self.next_index
    }
}

impl Iterator for SampledFrames {
    type Item = SampledFrame;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.session.next_frame() {
                Ok(Some(image)) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    if index % self.step != 0 {
                        continue;
                    }

                    let seq = self.next_seq;
                    self.next_seq += 1;
                    return Some(SampledFrame {
                        seq,
                        source_index: index,
                        timestamp_sec: index as f64 / self.fps,
                        image: image.to_rgb8(),
                    });
                }
                Ok(None) => self.done = true,
                Err(e) => {
                    warn!(
                        "Decoding stopped at frame {} ({}); keeping {} sampled frames",
                        self.next_index, e, self.next_seq
                    );
                    self.done = true;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::SyntheticVideoDecoder;
    use crate::core::{CoreError, ErrorKind};

    #[test]
    fn test_three_seconds_at_thirty_fps_yields_three_frames() {
        let decoder = SyntheticVideoDecoder::new(30.0);
        let video = SyntheticVideoDecoder::encode(90);

        let frames: Vec<_> = FrameSampler::default()
            .sample(&decoder, &video)
            .unwrap()
            .collect();

        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(|f| f.seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            frames.iter().map(|f| f.source_index).collect::<Vec<_>>(),
            vec![0, 30, 60]
        );
        assert!((frames[2].timestamp_sec - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_frames_is_not_an_error() {
        let decoder = SyntheticVideoDecoder::new(30.0);
        let video = SyntheticVideoDecoder::encode(0);

        let frames: Vec<_> = FrameSampler::default()
            .sample(&decoder, &video)
            .unwrap()
            .collect();
        assert!(frames.is_empty());
    }

    #[test]
    fn test_empty_upload_yields_no_frames() {
        let decoder = SyntheticVideoDecoder::new(30.0);
        let mut frames = FrameSampler::default().sample(&decoder, &[]).unwrap();

        assert!(frames.next().is_none());
        assert_eq!(frames.decoded_count(), 0);
    }

    #[test]
    fn test_unopenable_container_is_decode_error() {
        let decoder = SyntheticVideoDecoder::new(30.0);
        let err = FrameSampler::default()
            .sample(&decoder, b"garbage")
            .err()
            .unwrap();

        assert!(matches!(err, CoreError::Decode(_)));
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn test_corrupt_tail_keeps_prefix() {
        let decoder = SyntheticVideoDecoder::new(30.0).fail_after(45);
        let video = SyntheticVideoDecoder::encode(90);

        let mut frames = FrameSampler::default().sample(&decoder, &video).unwrap();
        let kept: Vec<_> = frames.by_ref().collect();

        assert_eq!(kept.len(), 2);
        assert_eq!(frames.decoded_count(), 45);
    }

    #[test]
    fn test_unreported_frame_rate_assumes_thirty() {
        let decoder = SyntheticVideoDecoder::without_frame_rate();
        let video = SyntheticVideoDecoder::encode(61);

        let frames: Vec<_> = FrameSampler::default()
            .sample(&decoder, &video)
            .unwrap()
            .collect();
        assert_eq!(
            frames.iter().map(|f| f.source_index).collect::<Vec<_>>(),
            vec![0, 30, 60]
        );
        assert!((frames[1].timestamp_sec - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_every_n_frames_stride() {
        let decoder = SyntheticVideoDecoder::new(30.0);
        let video = SyntheticVideoDecoder::encode(25);

        let frames: Vec<_> = FrameSampler::new(SamplingStride::EveryNFrames(10))
            .sample(&decoder, &video)
            .unwrap()
            .collect();
        assert_eq!(
            frames.iter().map(|f| f.source_index).collect::<Vec<_>>(),
            vec![0, 10, 20]
        );
    }

    #[test]
    fn test_frames_are_normalized_to_rgb() {
        let decoder = SyntheticVideoDecoder::new(30.0).emit_rgba();
        let video = SyntheticVideoDecoder::encode(1);

        let frame = FrameSampler::default()
            .sample(&decoder, &video)
            .unwrap()
            .next()
            .unwrap();
        assert_eq!(frame.image.as_raw().len(), (frame.image.width() * frame.image.height() * 3) as usize);
        assert_eq!(frame.image.get_pixel(0, 0).0, SyntheticVideoDecoder::color_for(0));
    }
}
