//! FFmpeg Integration Module
//!
//! Provides the FFmpeg plumbing used to decode uploaded videos:
//! - Binary detection (system-installed ffmpeg/ffprobe)
//! - Stream probing (dimensions, frame rate)
//! - Raw RGB frame streaming over a pipe

mod detection;
mod runner;

pub use detection::*;
pub use runner::{FFmpegRunner, VideoStreamInfo};

use crate::core::CoreError;

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg and make sure it is on PATH.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

impl From<FFmpegError> for CoreError {
    fn from(err: FFmpegError) -> Self {
        CoreError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_ffmpeg_error_display() {
        let err = FFmpegError::NotFound;
        assert!(err.to_string().contains("FFmpeg not found"));

        let err = FFmpegError::ExecutionFailed("exit code 1".to_string());
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_ffmpeg_error_maps_to_decode_error() {
        let err: CoreError = FFmpegError::ProbeError("moov atom not found".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
        assert!(err.to_string().contains("moov atom not found"));
    }
}
