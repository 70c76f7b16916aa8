//! framequery Core Type Definitions
//!
//! Defines fundamental types used throughout the pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{CoreError, CoreResult};

// =============================================================================
// ID Types
// =============================================================================

/// Zero-based position of a frame in sampling order.
/// Join key between the vector index and the frame store.
pub type Ordinal = usize;

/// Snapshot unique identifier (ULID)
pub type SnapshotId = String;

/// Time in seconds (floating point)
pub type TimeSec = f64;

// =============================================================================
// Frame
// =============================================================================

/// A sampled keyframe as recorded in the frame store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Position in the index (contiguous from 0)
    pub ordinal: Ordinal,
    /// Path of the keyframe image written at build time
    pub source_path: PathBuf,
    /// Index of the frame in the decoded stream
    pub source_index: u64,
    /// Presentation time of the frame
    pub timestamp_sec: TimeSec,
    /// Transcript text attached to the frame
    pub transcript: String,
}

// =============================================================================
// Embedding
// =============================================================================

/// Tolerance used when checking that a stored vector has unit length
pub const UNIT_NORM_TOLERANCE: f64 = 1e-3;

/// L2-normalized embedding vector.
///
/// The only way to build one is [`Embedding::normalized`], so every value in
/// circulation has unit length and finite components.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Normalizes a raw model output to unit length
    pub fn normalized(raw: Vec<f32>) -> CoreResult<Self> {
        if raw.is_empty() {
            return Err(CoreError::EmbeddingFailed(
                "model returned an empty vector".to_string(),
            ));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::EmbeddingFailed(
                "model returned non-finite values".to_string(),
            ));
        }

        let norm = raw
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt();
        if norm <= f64::EPSILON {
            return Err(CoreError::EmbeddingFailed(
                "model returned a zero vector".to_string(),
            ));
        }

        Ok(Self(
            raw.into_iter()
                .map(|v| (f64::from(v) / norm) as f32)
                .collect(),
        ))
    }

    /// Number of dimensions
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    /// Cosine similarity with another unit vector (plain dot product)
    pub fn similarity(&self, other: &[f32]) -> f32 {
        dot(&self.0, other)
    }

    /// Returns true if every component is within `tolerance` of `other`
    pub fn approx_eq(&self, other: &Embedding, tolerance: f32) -> bool {
        self.dim() == other.dim()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Dot product accumulated in f64 for stable scores
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum::<f64>() as f32
}

/// Returns true if the vector has unit L2 norm
pub(crate) fn is_unit_norm(vector: &[f32]) -> bool {
    if vector.is_empty() {
        return false;
    }
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    (norm - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

// =============================================================================
// Model Identity
// =============================================================================

/// Identity of the embedding model that produced a set of vectors
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelIdentity {
    /// Model name/version (e.g. "openai/clip-vit-large-patch14")
    pub id: String,
    /// Output dimensionality
    pub dimension: usize,
}

impl ModelIdentity {
    pub fn new(id: impl Into<String>, dimension: usize) -> Self {
        Self {
            id: id.into(),
            dimension,
        }
    }

    /// Fails with `ModelMismatch` unless both identities are equal
    pub fn ensure_matches(&self, actual: &ModelIdentity) -> CoreResult<()> {
        if self == actual {
            return Ok(());
        }
        Err(CoreError::ModelMismatch {
            expected: self.to_string(),
            actual: actual.to_string(),
        })
    }
}

impl std::fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}d)", self.id, self.dimension)
    }
}

// =============================================================================
// Retrieval Result
// =============================================================================

/// Best-matching frame for a question
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub frame: Frame,
    pub transcript: String,
    /// Cosine similarity in [-1, 1]; higher is more similar
    pub score: f32,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_has_unit_length() {
        let e = Embedding::normalized(vec![3.0, 4.0]).unwrap();

        assert!((e.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((e.as_slice()[1] - 0.8).abs() < 1e-6);
        assert!(is_unit_norm(e.as_slice()));
    }

    #[test]
    fn test_normalized_rejects_degenerate_vectors() {
        assert!(matches!(
            Embedding::normalized(vec![]),
            Err(CoreError::EmbeddingFailed(_))
        ));
        assert!(matches!(
            Embedding::normalized(vec![0.0, 0.0]),
            Err(CoreError::EmbeddingFailed(_))
        ));
        assert!(matches!(
            Embedding::normalized(vec![1.0, f32::NAN]),
            Err(CoreError::EmbeddingFailed(_))
        ));
    }

    #[test]
    fn test_self_similarity_is_one() {
        let e = Embedding::normalized(vec![0.2, -0.5, 0.9]).unwrap();
        assert!((e.similarity(e.as_slice()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_model_identity_mismatch() {
        let a = ModelIdentity::new("clip-a", 4);
        let b = ModelIdentity::new("clip-a", 8);

        assert!(a.ensure_matches(&a.clone()).is_ok());
        let err = a.ensure_matches(&b).unwrap_err();
        assert!(matches!(err, CoreError::ModelMismatch { .. }));
        assert!(err.to_string().contains("clip-a (4d)"));
    }
}
