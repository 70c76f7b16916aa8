//! Indexing System Module
//!
//! Builds and persists the searchable snapshot of a video: the vector index,
//! the positionally aligned frame store, and the keyframe images.

pub mod builder;
pub mod frame_store;
pub mod snapshot;
pub mod vector_index;

pub use builder::{BuildReport, IndexBuilder, IndexBuilderOptions};
pub use frame_store::FrameStore;
pub use snapshot::{Snapshot, SnapshotMeta, SnapshotStore};
pub use vector_index::{SearchHit, VectorIndex};
