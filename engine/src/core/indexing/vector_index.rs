//! Vector Index
//!
//! Exact nearest-neighbor search over L2-normalized embeddings. Similarity is
//! the dot product of unit vectors (cosine similarity), so scores fall in
//! [-1, 1] and an exact match scores 1.0.
//!
//! The index is a flat, row-major `f32` matrix. At the scale of one video
//! (dozens to a few thousand keyframes) a linear scan is fast enough and
//! keeps results exact and reproducible.

use std::cmp::Ordering;

use crate::core::{dot, is_unit_norm, CoreError, CoreResult, Embedding, Ordinal};

/// Magic bytes at the start of a serialized index
pub const INDEX_MAGIC: &[u8; 4] = b"FQVI";

/// Serialized index layout version
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// magic + version (u32) + dimension (u32) + count (u64)
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// A search hit: index position and similarity score
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchHit {
    pub position: Ordinal,
    pub score: f32,
}

/// Flat exact-search index
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Builds an index from vectors in position order
    pub fn build(vectors: Vec<Embedding>) -> CoreResult<Self> {
        let Some(first) = vectors.first() else {
            return Ok(Self::default());
        };
        let dimension = first.dim();

        let mut data = Vec::with_capacity(dimension * vectors.len());
        for (position, vector) in vectors.into_iter().enumerate() {
            if vector.dim() != dimension {
                return Err(CoreError::ModelMismatch {
                    expected: format!("{}d vectors", dimension),
                    actual: format!("{}d vector at position {}", vector.dim(), position),
                });
            }
            data.extend(vector.into_vec());
        }

        Ok(Self { dimension, data })
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Stored vector at `position`
    pub fn vector(&self, position: Ordinal) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// Returns the `k` most similar positions, best first.
    ///
    /// Ties are broken by lower position so the earliest frame wins.
    pub fn search(&self, query: &Embedding, k: usize) -> CoreResult<Vec<SearchHit>> {
        if self.is_empty() {
            return Err(CoreError::EmptyIndex);
        }
        if query.dim() != self.dimension {
            return Err(CoreError::ModelMismatch {
                expected: format!("{}d index", self.dimension),
                actual: format!("{}d query", query.dim()),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| SearchHit {
                position,
                score: dot(query.as_slice(), row),
            })
            .collect();

        hits.sort_by(|a, b| {
            // partial_cmp treats -0.0 and 0.0 as equal; scores are finite
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.truncate(k.min(self.len()));
        Ok(hits)
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Serializes the index (little-endian, see module docs for layout)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + std::mem::size_of_val(&self.data[..]));
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Deserializes an index written by [`VectorIndex::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!(
                "index blob is {} bytes, shorter than its header",
                bytes.len()
            )));
        }
        if &bytes[0..4] != INDEX_MAGIC {
            return Err(corrupt("index blob has wrong magic bytes".to_string()));
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != INDEX_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported index format version {}",
                version
            )));
        }

        let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = usize::try_from(u64::from_le_bytes(count_bytes))
            .map_err(|_| corrupt("index vector count overflows".to_string()))?;

        if count > 0 && dimension == 0 {
            return Err(corrupt("index has vectors but zero dimension".to_string()));
        }

        let expected_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or_else(|| corrupt("index size overflows".to_string()))?;
        if bytes.len() != expected_len {
            return Err(corrupt(format!(
                "index blob is {} bytes, expected {}",
                bytes.len(),
                expected_len
            )));
        }

        let data: Vec<f32> = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if data.iter().any(|v| !v.is_finite()) {
            return Err(corrupt("index contains non-finite values".to_string()));
        }

        let index = Self {
            dimension: if count == 0 { 0 } else { dimension },
            data,
        };
        for position in 0..index.len() {
            if !index.vector(position).map(is_unit_norm).unwrap_or(false) {
                return Err(corrupt(format!(
                    "vector at position {} is not unit length",
                    position
                )));
            }
        }
        Ok(index)
    }
}

fn corrupt(msg: String) -> CoreError {
    CoreError::CorruptStore(msg)
}
