//! Embedding Model Module
//!
//! Defines the capability interface for models that map images and text into
//! a shared embedding space, plus the checks every implementation is held to.

#[cfg(feature = "ai-providers")]
mod clip_service;

#[cfg(feature = "ai-providers")]
pub use clip_service::ClipServiceModel;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tracing::info;

use crate::core::{CoreError, CoreResult, Embedding, ModelIdentity};

/// Maximum per-component difference tolerated between two embeddings of the
/// same input
pub const DETERMINISM_TOLERANCE: f32 = 1e-5;

// =============================================================================
// Embedding Model Trait
// =============================================================================

/// Frozen, pretrained image/text embedding model (CLIP and friends)
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model name and output dimensionality
    fn identity(&self) -> &ModelIdentity;

    /// Embeds an RGB image
    async fn embed_image(&self, image: &RgbImage) -> CoreResult<Embedding>;

    /// Embeds a text string (callers never pass empty text)
    async fn embed_text(&self, text: &str) -> CoreResult<Embedding>;
}

/// Validates a raw model output against the model identity and normalizes it
pub fn to_embedding(identity: &ModelIdentity, raw: Vec<f32>) -> CoreResult<Embedding> {
    if raw.len() != identity.dimension {
        return Err(CoreError::EmbeddingFailed(format!(
            "{} returned {} dimensions, expected {}",
            identity.id,
            raw.len(),
            identity.dimension
        )));
    }
    Embedding::normalized(raw)
}

// =============================================================================
// Determinism Check
// =============================================================================

/// Embeds a probe text and a probe image twice and requires identical output.
///
/// Retrieval is only reproducible if the loaded model is deterministic, so
/// this runs once at startup instead of being assumed.
pub async fn verify_determinism(model: &dyn EmbeddingModel) -> CoreResult<()> {
    let identity = model.identity();
    let text = "a photo of a person standing next to a red car";
    let image = probe_image();

    let t1 = model.embed_text(text).await?;
    let t2 = model.embed_text(text).await?;
    if !t1.approx_eq(&t2, DETERMINISM_TOLERANCE) {
        return Err(CoreError::NondeterministicModel(format!(
            "{} produced different text embeddings for the same input",
            identity
        )));
    }

    let i1 = model.embed_image(&image).await?;
    let i2 = model.embed_image(&image).await?;
    if !i1.approx_eq(&i2, DETERMINISM_TOLERANCE) {
        return Err(CoreError::NondeterministicModel(format!(
            "{} produced different image embeddings for the same input",
            identity
        )));
    }

    if t1.dim() != i1.dim() {
        return Err(CoreError::EmbeddingFailed(format!(
            "{} text ({}d) and image ({}d) embeddings differ in size",
            identity,
            t1.dim(),
            i1.dim()
        )));
    }

    info!("Embedding model {} passed determinism check", identity);
    Ok(())
}

/// Small gradient image used as the determinism probe
fn probe_image() -> RgbImage {
    RgbImage::from_fn(32, 32, |x, y| {
        Rgb([(x * 8) as u8, (y * 8) as u8, ((x + y) * 4) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeEmbeddingModel;
    use crate::core::ErrorKind;

    #[test]
    fn test_to_embedding_checks_dimension() {
        let identity = ModelIdentity::new("clip", 3);

        let ok = to_embedding(&identity, vec![1.0, 2.0, 2.0]).unwrap();
        assert!((ok.as_slice()[0] - 1.0 / 3.0).abs() < 1e-6);

        let err = to_embedding(&identity, vec![1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingFailed);
    }

    #[tokio::test]
    async fn test_deterministic_model_passes() {
        let model = FakeEmbeddingModel::new();
        verify_determinism(&model).await.unwrap();
    }

    #[tokio::test]
    async fn test_nondeterministic_model_is_rejected() {
        let model = FakeEmbeddingModel::new().jittery();
        let err = verify_determinism(&model).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NondeterministicModel);
    }
}
