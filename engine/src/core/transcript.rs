//! Frame Transcripts
//!
//! Transcript production is a pluggable collaborator. Until a real
//! speech/caption pipeline is wired in, frames get a placeholder transcript.

use async_trait::async_trait;

use crate::core::sampling::SampledFrame;
use crate::core::CoreResult;

/// Produces the transcript text attached to a sampled frame
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, frame: &SampledFrame) -> CoreResult<String>;
}

/// Labels each frame with its position in the source video
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaceholderTranscriber;

#[async_trait]
impl Transcriber for PlaceholderTranscriber {
    async fn transcribe(&self, frame: &SampledFrame) -> CoreResult<String> {
        Ok(placeholder_transcript(frame.source_index))
    }
}

pub fn placeholder_transcript(source_index: u64) -> String {
    format!("Transcription for frame {}", source_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[tokio::test]
    async fn test_placeholder_uses_source_frame_index() {
        let frame = SampledFrame {
            seq: 1,
            source_index: 30,
            timestamp_sec: 1.0,
            image: RgbImage::new(2, 2),
        };

        let text = PlaceholderTranscriber.transcribe(&frame).await.unwrap();
        assert_eq!(text, "Transcription for frame 30");
    }
}
