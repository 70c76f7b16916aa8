//! Video Context
//!
//! Holds the currently active snapshot. Readers take a cheap `Arc` clone and
//! keep using it even if a rebuild swaps in a new one. While a build is in
//! progress, queries are refused instead of being served from a half-built
//! or about-to-be-replaced snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::core::indexing::Snapshot;
use crate::core::{CoreError, CoreResult};

/// Active snapshot plus the build-in-progress flag
#[derive(Debug, Default)]
pub struct VideoContext {
    active: RwLock<Option<Arc<Snapshot>>>,
    building: AtomicBool,
}

impl VideoContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context that starts with `snapshot` active
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            active: RwLock::new(Some(Arc::new(snapshot))),
            building: AtomicBool::new(false),
        }
    }

    /// Returns the snapshot queries should run against.
    ///
    /// Fails with `IndexBuilding` during a build and `NoContext` before the
    /// first successful build.
    pub fn snapshot(&self) -> CoreResult<Arc<Snapshot>> {
        if self.is_building() {
            return Err(CoreError::IndexBuilding);
        }
        self.current().ok_or(CoreError::NoContext)
    }

    /// Active snapshot regardless of build state
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    /// Marks a build as started. Only one build may run at a time.
    pub fn begin_build(&self) -> CoreResult<BuildGuard<'_>> {
        if self.building.swap(true, Ordering::AcqRel) {
            return Err(CoreError::IndexBuilding);
        }
        Ok(BuildGuard { context: self })
    }

    /// Replaces the active snapshot, returning the previous one
    pub fn install(&self, snapshot: Snapshot) -> Option<Arc<Snapshot>> {
        let next = Arc::new(snapshot);
        info!(
            "Activating snapshot {} ({} frames)",
            next.id(),
            next.len()
        );

        let mut guard = match self.active.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.replace(next)
    }
}

/// Clears the building flag when dropped, including on error or cancellation
#[derive(Debug)]
pub struct BuildGuard<'a> {
    context: &'a VideoContext,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.context.building.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::indexing::{FrameStore, VectorIndex};
    use crate::core::{Embedding, Frame, ModelIdentity};
    use std::path::PathBuf;

    fn snapshot(id: &str) -> Snapshot {
        let index = VectorIndex::build(vec![Embedding::normalized(vec![1.0, 0.0]).unwrap()])
            .unwrap();
        let store = FrameStore::from_frames(vec![Frame {
            ordinal: 0,
            source_path: PathBuf::from("frame_000000.jpg"),
            source_index: 0,
            timestamp_sec: 0.0,
            transcript: "Transcription for frame 0".to_string(),
        }])
        .unwrap();
        Snapshot::new(id.to_string(), ModelIdentity::new("clip", 2), index, store).unwrap()
    }

    #[test]
    fn test_empty_context_has_no_snapshot() {
        let context = VideoContext::new();
        assert!(matches!(context.snapshot(), Err(CoreError::NoContext)));
    }

    #[test]
    fn test_install_swaps_snapshot() {
        let context = VideoContext::new();
        assert!(context.install(snapshot("A")).is_none());

        let held = context.snapshot().unwrap();
        let previous = context.install(snapshot("B")).unwrap();

        assert_eq!(previous.id(), "A");
        assert_eq!(held.id(), "A");
        assert_eq!(context.snapshot().unwrap().id(), "B");
    }

    #[test]
    fn test_queries_refused_while_building() {
        let context = VideoContext::with_snapshot(snapshot("A"));

        let guard = context.begin_build().unwrap();
        assert!(matches!(context.snapshot(), Err(CoreError::IndexBuilding)));
        assert!(context.current().is_some());

        drop(guard);
        assert_eq!(context.snapshot().unwrap().id(), "A");
    }

    #[test]
    fn test_only_one_build_at_a_time() {
        let context = VideoContext::new();

        let first = context.begin_build().unwrap();
        assert!(matches!(
            context.begin_build(),
            Err(CoreError::IndexBuilding)
        ));

        drop(first);
        assert!(context.begin_build().is_ok());
    }
}
