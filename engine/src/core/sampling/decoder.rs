//! Video Decoder Traits
//!
//! Decoding backends plug in behind these two traits: a [`VideoDecoder`]
//! opens a container, and the [`FrameDecoder`] it returns streams frames
//! one at a time.

use image::DynamicImage;

use crate::core::CoreResult;

/// A decoding session over one video
pub trait FrameDecoder: Send {
    /// Frame rate reported by the container, if any
    fn frame_rate(&self) -> Option<f64>;

    /// Decodes the next frame.
    ///
    /// `Ok(None)` marks the end of the stream. An `Err` means this frame
    /// could not be decoded; callers treat it as the end of usable data.
    fn next_frame(&mut self) -> CoreResult<Option<DynamicImage>>;
}

/// Opens video containers for decoding
pub trait VideoDecoder: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Opens `video` for decoding.
    ///
    /// Fails with `CoreError::Decode` if the container cannot be opened.
    /// Empty input is not a container error; it decodes to zero frames.
    fn open(&self, video: &[u8]) -> CoreResult<Box<dyn FrameDecoder>>;
}

/// Session over an empty upload: no frame rate, no frames
pub struct NoFrames;

impl FrameDecoder for NoFrames {
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn next_frame(&mut self) -> CoreResult<Option<DynamicImage>> {
        Ok(None)
    }
}
