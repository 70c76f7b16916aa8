//! framequery Core Engine
//!
//! Cross-modal frame retrieval: sampling, embedding, indexing, retrieval,
//! and the question-answering flow built on top of it.

pub mod context;
pub mod embedding;
pub mod ffmpeg;
pub mod fs;
pub mod indexing;
pub mod memory;
pub mod retrieval;
pub mod sampling;
pub mod session;
pub mod settings;
pub mod transcript;
pub mod vqa;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
