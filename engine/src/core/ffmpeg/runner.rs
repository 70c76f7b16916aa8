//! FFmpeg Runner Module
//!
//! Probes the video stream of an uploaded file and spawns the raw-frame
//! decoding process.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;

use super::{FFmpegError, FFmpegInfo, FFmpegResult};

/// First video stream of a container, as reported by ffprobe
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    /// Display width, after rotation metadata is applied
    pub width: u32,
    /// Display height, after rotation metadata is applied
    pub height: u32,
    /// Clockwise rotation in degrees, normalized to 0, 90, 180 or 270
    pub rotation: u32,
    /// Frame rate, if the container exposes a usable one
    pub fps: Option<f64>,
    pub codec: String,
}

/// Subset of `ffprobe -show_streams -print_format json`
#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: String,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Default, Deserialize)]
struct ProbeTags {
    /// Legacy rotation tag, e.g. "90"
    #[serde(default)]
    rotate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    /// Display matrix rotation, counter-clockwise degrees
    #[serde(default)]
    rotation: Option<f64>,
}

impl ProbeStream {
    fn rotation(&self) -> u32 {
        // Display matrix rotation is counter-clockwise; the legacy tag is clockwise.
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .map(|r| -r)
            .or_else(|| {
                self.tags
                    .rotate
                    .as_deref()
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);

        if !degrees.is_finite() {
            return 0;
        }
        let quarter_turns = (degrees / 90.0).round() as i64;
        (quarter_turns.rem_euclid(4) * 90) as u32
    }
}

impl From<ProbeStream> for VideoStreamInfo {
    fn from(stream: ProbeStream) -> Self {
        let rotation = stream.rotation();
        // ffmpeg autorotates, so quarter turns swap the decoded frame size
        let (width, height) = if rotation % 180 == 90 {
            (stream.height, stream.width)
        } else {
            (stream.width, stream.height)
        };

        // avg_frame_rate first; r_frame_rate can be a timebase guess like 90000/1
        let fps = [stream.avg_frame_rate, stream.r_frame_rate]
            .into_iter()
            .flatten()
            .find_map(|rate| parse_rational(&rate));

        Self {
            width,
            height,
            rotation,
            fps,
            codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Runs ffprobe/ffmpeg from a detected installation
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Probes `input` and returns its first video stream
    pub fn probe_video(&self, input: &Path) -> FFmpegResult<VideoStreamInfo> {
        if !input.is_file() {
            return Err(FFmpegError::InvalidInput(format!(
                "not a file: {}",
                input.display()
            )));
        }

        let output = Command::new(&self.info.ffprobe_path)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(input)
            .output()?;

        if !output.status.success() {
            return Err(FFmpegError::ProbeError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_video_stream(&output.stdout)
    }

    /// Spawns ffmpeg decoding the first video stream to packed RGB24 on stdout.
    ///
    /// Frames are autorotated, so each one is exactly `width * height * 3`
    /// bytes of the display dimensions reported by [`Self::probe_video`].
    pub fn spawn_rgb_stream(&self, input: &Path) -> FFmpegResult<Child> {
        let child = Command::new(&self.info.ffmpeg_path)
            .args(["-v", "error", "-nostdin", "-autorotate", "-i"])
            .arg(input)
            .args(["-map", "0:v:0", "-vsync", "passthrough"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(child)
    }
}

fn parse_video_stream(json: &[u8]) -> FFmpegResult<VideoStreamInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| FFmpegError::ParseError(format!("ffprobe output: {}", e)))?;

    probe
        .streams
        .into_iter()
        .find(|s| s.codec_type == "video")
        .map(VideoStreamInfo::from)
        .ok_or_else(|| FFmpegError::InvalidInput("container has no video stream".to_string()))
}

/// Parses "30000/1001" or "25" into a positive rate
fn parse_rational(s: &str) -> Option<f64> {
    let value = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picks_first_video_stream() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1280,
                    "height": 720,
                    "avg_frame_rate": "30000/1001",
                    "r_frame_rate": "30000/1001"
                }
            ]
        }"#;

        let stream = parse_video_stream(json).unwrap();
        assert_eq!((stream.width, stream.height), (1280, 720));
        assert_eq!(stream.codec, "h264");
        assert!((stream.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_audio_only_container_is_rejected() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_video_stream(json),
            Err(FFmpegError::InvalidInput(_))
        ));
        assert!(parse_video_stream(b"{}").is_err());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(
            parse_video_stream(b"not json"),
            Err(FFmpegError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_rational("30/1"), Some(30.0));
        assert_eq!(parse_rational("25"), Some(25.0));
        assert_eq!(parse_rational("0/0"), None);
        assert_eq!(parse_rational("0/1"), None);
        assert_eq!(parse_rational("abc"), None);
    }

    #[test]
    fn test_unusable_avg_rate_falls_back_to_r_frame_rate() {
        let json = br#"{"streams": [{
            "codec_type": "video",
            "width": 4,
            "height": 4,
            "avg_frame_rate": "0/0",
            "r_frame_rate": "24/1"
        }]}"#;
        assert_eq!(parse_video_stream(json).unwrap().fps, Some(24.0));
    }

    #[test]
    fn test_quarter_turn_display_matrix_swaps_dimensions() {
        let json = br#"{"streams": [{
            "codec_type": "video",
            "width": 1920,
            "height": 1080,
            "avg_frame_rate": "30/1",
            "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]
        }]}"#;

        let stream = parse_video_stream(json).unwrap();
        assert_eq!((stream.width, stream.height), (1080, 1920));
        assert_eq!(stream.rotation, 90);
    }

    #[test]
    fn test_legacy_rotate_tag() {
        let json = br#"{"streams": [{
            "codec_type": "video",
            "width": 640,
            "height": 480,
            "tags": {"rotate": "270"}
        }]}"#;
        let stream = parse_video_stream(json).unwrap();
        assert_eq!((stream.width, stream.height), (480, 640));
        assert_eq!(stream.rotation, 270);

        let json = br#"{"streams": [{
            "codec_type": "video",
            "width": 640,
            "height": 480,
            "side_data_list": [{"rotation": 180}]
        }]}"#;
        let stream = parse_video_stream(json).unwrap();
        assert_eq!((stream.width, stream.height), (640, 480));
        assert_eq!(stream.rotation, 180);
    }

    #[test]
    fn test_missing_rates_leave_fps_unset() {
        let json = br#"{"streams": [{"codec_type": "video", "width": 2, "height": 2}]}"#;
        let stream = parse_video_stream(json).unwrap();
        assert_eq!(stream.fps, None);
        assert_eq!(stream.codec, "unknown");
    }
}
