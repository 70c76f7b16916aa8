//! Test Doubles
//!
//! Deterministic stand-ins for the decoder and the models, shared by unit
//! tests and (through the `test-support` feature) integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

use crate::core::embedding::{to_embedding, EmbeddingModel};
use crate::core::sampling::{FrameDecoder, VideoDecoder};
use crate::core::vqa::{VqaModel, VqaRequest};
use crate::core::{CoreError, CoreResult, Embedding, ModelIdentity};

// =============================================================================
// Synthetic Video
// =============================================================================

const SYNTHETIC_MAGIC: &[u8; 8] = b"FQSYNTH\0";

pub const SYNTHETIC_WIDTH: u32 = 16;
pub const SYNTHETIC_HEIGHT: u32 = 12;

/// Decodes "videos" produced by [`SyntheticVideoDecoder::encode`]: every
/// frame is a solid color derived from its index.
#[derive(Clone, Debug)]
pub struct SyntheticVideoDecoder {
    fps: Option<f64>,
    fail_after: Option<u64>,
    rgba: bool,
}

impl SyntheticVideoDecoder {
    pub fn new(fps: f64) -> Self {
        Self {
            fps: Some(fps),
            fail_after: None,
            rgba: false,
        }
    }

    /// Container reports no frame rate
    pub fn without_frame_rate() -> Self {
        Self {
            fps: None,
            fail_after: None,
            rgba: false,
        }
    }

    /// Frame `index` and everything after it fail to decode
    pub fn fail_after(mut self, index: u64) -> Self {
        self.fail_after = Some(index);
        self
    }

    /// Emits RGBA frames instead of RGB
    pub fn emit_rgba(mut self) -> Self {
        self.rgba = true;
        self
    }

    /// Bytes of a synthetic video with `frame_count` frames
    pub fn encode(frame_count: u64) -> Vec<u8> {
        let mut bytes = SYNTHETIC_MAGIC.to_vec();
        bytes.extend_from_slice(&frame_count.to_le_bytes());
        bytes
    }

    /// Color of every pixel of frame `index`
    pub fn color_for(index: u64) -> [u8; 3] {
        [
            (index.wrapping_mul(37) % 256) as u8,
            (index.wrapping_mul(91).wrapping_add(50) % 256) as u8,
            (index.wrapping_mul(13).wrapping_add(100) % 256) as u8,
        ]
    }

    /// Solid RGB image for frame `index`
    pub fn image_for(index: u64) -> RgbImage {
        RgbImage::from_pixel(
            SYNTHETIC_WIDTH,
            SYNTHETIC_HEIGHT,
            Rgb(Self::color_for(index)),
        )
    }
}

impl VideoDecoder for SyntheticVideoDecoder {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self, video: &[u8]) -> CoreResult<Box<dyn FrameDecoder>> {
        if video.len() != SYNTHETIC_MAGIC.len() + 8 || &video[..8] != SYNTHETIC_MAGIC {
            return Err(CoreError::Decode("not a synthetic video".to_string()));
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&video[8..16]);

        Ok(Box::new(SyntheticFrames {
            decoder: self.clone(),
            frame_count: u64::from_le_bytes(count),
            next: 0,
        }))
    }
}

struct SyntheticFrames {
    decoder: SyntheticVideoDecoder,
    frame_count: u64,
    next: u64,
}

impl FrameDecoder for SyntheticFrames {
    fn frame_rate(&self) -> Option<f64> {
        self.decoder.fps
    }

    fn next_frame(&mut self) -> CoreResult<Option<DynamicImage>> {
        if self.next >= self.frame_count {
            return Ok(None);
        }
        if self.decoder.fail_after.is_some_and(|limit| self.next >= limit) {
            return Err(CoreError::Decode(format!("corrupt frame {}", self.next)));
        }

        let index = self.next;
        self.next += 1;

        let image = if self.decoder.rgba {
            let [r, g, b] = SyntheticVideoDecoder::color_for(index);
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                SYNTHETIC_WIDTH,
                SYNTHETIC_HEIGHT,
                Rgba([r, g, b, 255]),
            ))
        } else {
            DynamicImage::ImageRgb8(SyntheticVideoDecoder::image_for(index))
        };
        Ok(Some(image))
    }
}

// =============================================================================
// Fake Embedding Model
// =============================================================================

/// Deterministic embedding model over colors.
///
/// An image embeds as its mean color; the text `"color R G B"` embeds to the
/// same vector as a solid image of that color, so a question can be aimed at
/// an exact frame. Other text embeds to a color derived from its hash.
#[derive(Debug)]
pub struct FakeEmbeddingModel {
    identity: ModelIdentity,
    jitter: bool,
    failing_on: Option<[u8; 3]>,
    image_delay: Option<Duration>,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
}

impl Default for FakeEmbeddingModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEmbeddingModel {
    pub fn new() -> Self {
        Self {
            identity: ModelIdentity::new("fake-clip", 8),
            jitter: false,
            failing_on: None,
            image_delay: None,
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_identity(mut self, identity: ModelIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Every call returns a slightly different vector
    pub fn jittery(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Images whose mean color is `color` fail to embed
    pub fn failing_on(mut self, color: [u8; 3]) -> Self {
        self.failing_on = Some(color);
        self
    }

    /// Sleeps before each image embedding
    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = Some(delay);
        self
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    /// Question text that embeds exactly like a solid `color` frame
    pub fn color_query(color: [u8; 3]) -> String {
        format!("color {} {} {}", color[0], color[1], color[2])
    }

    fn vector_for(&self, rgb: [f64; 3], call: usize) -> CoreResult<Embedding> {
        let [r, g, b] = rgb.map(|c| c / 255.0);
        let base = [r, g, b, 1.0 - r, 1.0 - g, 1.0 - b, 0.5, 0.25];

        let mut raw: Vec<f32> = (0..self.identity.dimension)
            .map(|i| (base[i % base.len()] * (1.0 + (i / base.len()) as f64 * 0.1)) as f32)
            .collect();
        if self.jitter {
            if let Some(first) = raw.first_mut() {
                *first += 1e-3 * (call + 1) as f32;
            }
        }
        to_embedding(&self.identity, raw)
    }
}

fn parse_color_query(text: &str) -> Option<[f64; 3]> {
    let mut parts = text.split_whitespace();
    if parts.next()? != "color" {
        return None;
    }
    let mut rgb = [0.0; 3];
    for slot in rgb.iter_mut() {
        *slot = f64::from(parts.next()?.parse::<u8>().ok()?);
    }
    parts.next().is_none().then_some(rgb)
}

fn hashed_color(text: &str) -> [f64; 3] {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    [
        (hash & 0xff) as f64,
        ((hash >> 8) & 0xff) as f64,
        ((hash >> 16) & 0xff) as f64,
    ]
}

fn mean_color(image: &RgbImage) -> [f64; 3] {
    let mut sum = [0u64; 3];
    for pixel in image.pixels() {
        for (acc, channel) in sum.iter_mut().zip(pixel.0) {
            *acc += u64::from(channel);
        }
    }
    let n = u64::from(image.width()) * u64::from(image.height());
    if n == 0 {
        return [0.0; 3];
    }
    sum.map(|s| s as f64 / n as f64)
}

#[async_trait]
impl EmbeddingModel for FakeEmbeddingModel {
    fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    async fn embed_image(&self, image: &RgbImage) -> CoreResult<Embedding> {
        let call = self.image_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.image_delay {
            tokio::time::sleep(delay).await;
        }

        let rgb = mean_color(image);
        if let Some(color) = self.failing_on {
            if rgb.map(|c| c.round() as u8) == color {
                return Err(CoreError::EmbeddingFailed(format!(
                    "refusing to embed color {:?}",
                    color
                )));
            }
        }
        self.vector_for(rgb, call)
    }

    async fn embed_text(&self, text: &str) -> CoreResult<Embedding> {
        let call = self.text_calls.fetch_add(1, Ordering::SeqCst);
        let rgb = parse_color_query(text).unwrap_or_else(|| hashed_color(text));
        self.vector_for(rgb, call)
    }
}

// =============================================================================
// Fake VQA Model
// =============================================================================

/// Records every request and answers with a canned sentence
#[derive(Debug, Default)]
pub struct FakeVqaModel {
    requests: Mutex<Vec<VqaRequest>>,
    fail: bool,
}

impl FakeVqaModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request fails with `VqaRequestFailed`
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<VqaRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Answer text produced for `request`
    pub fn answer_for(request: &VqaRequest) -> String {
        let frame = request
            .frame_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("Seen in {}: {}", frame, request.question)
    }
}

#[async_trait]
impl VqaModel for FakeVqaModel {
    fn name(&self) -> &str {
        "fake-vqa"
    }

    async fn generate_answer(&self, request: &VqaRequest) -> CoreResult<String> {
        match self.requests.lock() {
            Ok(mut guard) => guard.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        if self.fail {
            return Err(CoreError::VqaRequestFailed("fake VQA outage".to_string()));
        }
        Ok(Self::answer_for(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_colors_are_distinct_at_sample_points() {
        let colors: Vec<_> = [0u64, 30, 60]
            .iter()
            .map(|i| SyntheticVideoDecoder::color_for(*i))
            .collect();
        assert_ne!(colors[0], colors[1]);
        assert_ne!(colors[1], colors[2]);
    }

    #[tokio::test]
    async fn test_color_query_matches_solid_image() {
        let model = FakeEmbeddingModel::new();
        let color = SyntheticVideoDecoder::color_for(30);

        let image = model
            .embed_image(&SyntheticVideoDecoder::image_for(30))
            .await
            .unwrap();
        let text = model
            .embed_text(&FakeEmbeddingModel::color_query(color))
            .await
            .unwrap();

        assert!((image.similarity(text.as_slice()) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_distinct_colors_score_below_one() {
        let model = FakeEmbeddingModel::new();
        let a = model
            .embed_image(&SyntheticVideoDecoder::image_for(0))
            .await
            .unwrap();
        let b = model
            .embed_image(&SyntheticVideoDecoder::image_for(30))
            .await
            .unwrap();
        assert!(a.similarity(b.as_slice()) < 0.999);
    }
}
