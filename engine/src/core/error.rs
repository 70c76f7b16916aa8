//! framequery Error Definitions
//!
//! Defines error types used throughout the pipeline. Every variant maps to a
//! stable [`ErrorKind`] code so callers can tell "no video indexed yet" apart
//! from "empty question" or "busy reindexing" without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core pipeline error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("Failed to decode video: {0}")]
    Decode(String),

    #[error("Video produced no frames to index")]
    EmptyVideo,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // =========================================================================
    // Context Errors
    // =========================================================================
    #[error("No video has been indexed yet")]
    NoContext,

    #[error("No confident match: best score {score:.4} is below threshold {threshold:.4}")]
    NoConfidentMatch { score: f32, threshold: f32 },

    #[error("Index is being rebuilt, try again once indexing finishes")]
    IndexBuilding,

    // =========================================================================
    // Persisted State Errors
    // =========================================================================
    #[error("Vector index is empty")]
    EmptyIndex,

    #[error("Frame store corrupted: {0}")]
    CorruptStore(String),

    #[error("Embedding model mismatch: index built with {expected}, current model is {actual}")]
    ModelMismatch { expected: String, actual: String },

    // =========================================================================
    // Model Errors
    // =========================================================================
    #[error("Embedding model is not deterministic: {0}")]
    NondeterministicModel(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("VQA request failed: {0}")]
    VqaRequestFailed(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core pipeline result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Stable, machine-readable error codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DecodeError,
    EmptyVideo,
    InvalidQuery,
    NoContext,
    NoConfidentMatch,
    IndexBuilding,
    EmptyIndex,
    CorruptStore,
    ModelMismatch,
    NondeterministicModel,
    EmbeddingFailed,
    VqaFailed,
    Cancelled,
    InvalidSettings,
    IoError,
    JsonError,
    DatabaseError,
    Internal,
}

impl ErrorKind {
    /// Returns the wire code for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::EmptyVideo => "empty_video",
            ErrorKind::InvalidQuery => "invalid_query",
            ErrorKind::NoContext => "no_context",
            ErrorKind::NoConfidentMatch => "no_confident_match",
            ErrorKind::IndexBuilding => "index_building",
            ErrorKind::EmptyIndex => "empty_index",
            ErrorKind::CorruptStore => "corrupt_store",
            ErrorKind::ModelMismatch => "model_mismatch",
            ErrorKind::NondeterministicModel => "nondeterministic_model",
            ErrorKind::EmbeddingFailed => "embedding_failed",
            ErrorKind::VqaFailed => "vqa_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidSettings => "invalid_settings",
            ErrorKind::IoError => "io_error",
            ErrorKind::JsonError => "json_error",
            ErrorKind::DatabaseError => "database_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    /// Returns the stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Decode(_) => ErrorKind::DecodeError,
            CoreError::EmptyVideo => ErrorKind::EmptyVideo,
            CoreError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            CoreError::NoContext => ErrorKind::NoContext,
            CoreError::NoConfidentMatch { .. } => ErrorKind::NoConfidentMatch,
            CoreError::IndexBuilding => ErrorKind::IndexBuilding,
            CoreError::EmptyIndex => ErrorKind::EmptyIndex,
            CoreError::CorruptStore(_) => ErrorKind::CorruptStore,
            CoreError::ModelMismatch { .. } => ErrorKind::ModelMismatch,
            CoreError::NondeterministicModel(_) => ErrorKind::NondeterministicModel,
            CoreError::EmbeddingFailed(_) => ErrorKind::EmbeddingFailed,
            CoreError::VqaRequestFailed(_) => ErrorKind::VqaFailed,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::InvalidSettings(_) => ErrorKind::InvalidSettings,
            CoreError::IoError(_) => ErrorKind::IoError,
            CoreError::JsonError(_) => ErrorKind::JsonError,
            CoreError::Database(_) => ErrorKind::DatabaseError,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}
