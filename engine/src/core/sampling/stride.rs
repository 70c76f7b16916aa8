//! Sampling Stride
//!
//! Converts a sampling policy into a decoded-frame step.

use serde::{Deserialize, Serialize};

/// Frame rate assumed when the container does not report a usable one
pub const ASSUMED_FRAME_RATE: f64 = 30.0;

/// How often to keep a decoded frame
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode", content = "value")]
pub enum SamplingStride {
    /// Keep one frame every N decoded frames
    EveryNFrames(u32),
    /// Keep N frames per second of source, using the reported frame rate
    FramesPerSecond(f64),
}

impl Default for SamplingStride {
    fn default() -> Self {
        SamplingStride::FramesPerSecond(1.0)
    }
}

impl SamplingStride {
    /// Number of decoded frames between two kept frames (always >= 1)
    pub fn step(&self, reported_fps: Option<f64>) -> u64 {
        match *self {
            SamplingStride::EveryNFrames(n) => u64::from(n.max(1)),
            SamplingStride::FramesPerSecond(rate) => {
                let fps = reported_fps
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .unwrap_or(ASSUMED_FRAME_RATE);
                if !rate.is_finite() || rate <= 0.0 {
                    return fps.round().max(1.0) as u64;
                }
                (fps / rate).round().max(1.0) as u64
            }
        }
    }
}
