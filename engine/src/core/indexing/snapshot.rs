//! Snapshot Persistence
//!
//! A snapshot is the vector index and frame store of one video, saved and
//! loaded together so their positional alignment can never drift. On disk it
//! is a single SQLite file: the index as one blob, the frame store as rows.
//! New snapshots are written under a temporary name and renamed into place.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{FrameStore, VectorIndex};
use crate::core::fs::{atomic_replace, remove_dir_best_effort, tmp_path_for, with_file_lock};
use crate::core::{CoreError, CoreResult, Frame, ModelIdentity, SnapshotId};

/// Snapshot database file name
pub const SNAPSHOT_FILE: &str = "snapshot.db";

/// Advisory lock file guarding the snapshot across processes
pub const SNAPSHOT_LOCK_FILE: &str = "snapshot.lock";

/// Directory holding one keyframe folder per snapshot
pub const KEYFRAMES_DIR: &str = "keyframes";

/// On-disk layout version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// =============================================================================
// Snapshot
// =============================================================================

/// Descriptive fields stored alongside the index
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub format_version: u32,
    pub model: ModelIdentity,
    pub frame_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Immutable index + frame store pair for one video
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    meta: SnapshotMeta,
    index: VectorIndex,
    store: FrameStore,
}

impl Snapshot {
    /// Assembles a snapshot, enforcing the alignment invariants
    pub fn new(
        id: SnapshotId,
        model: ModelIdentity,
        index: VectorIndex,
        store: FrameStore,
    ) -> CoreResult<Self> {
        if index.is_empty() {
            return Err(CoreError::EmptyIndex);
        }
        if index.len() != store.len() {
            return Err(CoreError::CorruptStore(format!(
                "index has {} vectors but store has {} frames",
                index.len(),
                store.len()
            )));
        }
        if index.dimension() != model.dimension {
            return Err(CoreError::ModelMismatch {
                expected: model.to_string(),
                actual: format!("{}d vectors", index.dimension()),
            });
        }

        Ok(Self {
            meta: SnapshotMeta {
                id,
                format_version: SNAPSHOT_FORMAT_VERSION,
                model,
                frame_count: store.len(),
                created_at: Utc::now(),
            },
            index,
            store,
        })
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn model(&self) -> &ModelIdentity {
        &self.meta.model
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

// =============================================================================
// Snapshot Store
// =============================================================================

/// Reads and writes the snapshot under a data directory
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_LOCK_FILE)
    }

    /// Keyframe folder for a snapshot id
    pub fn keyframe_dir(&self, id: &str) -> PathBuf {
        self.dir.join(KEYFRAMES_DIR).join(id)
    }

    /// Returns true if a snapshot file exists
    pub fn exists(&self) -> bool {
        self.db_path().exists()
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        with_file_lock(&self.lock_path(), exclusive, op)
    }

    /// Writes `snapshot` and atomically replaces the previous one.
    ///
    /// Keyframe folders of the replaced snapshot and older ones are removed
    /// while the lock is still held. Newer folders may be staging for a
    /// build in another process and are left alone.
    pub fn save(&self, snapshot: &Snapshot) -> CoreResult<()> {
        self.with_lock(true, || {
            let dest = self.db_path();
            let previous = stored_snapshot_id(&dest);
            let staged = tmp_path_for(&dest);
            if staged.exists() {
                std::fs::remove_file(&staged)?;
            }

            if let Err(e) = write_database(&staged, snapshot) {
                let _ = std::fs::remove_file(&staged);
                return Err(e);
            }
            atomic_replace(&dest, &staged)?;

            info!(
                "Saved snapshot {} ({} frames) to {}",
                snapshot.id(),
                snapshot.len(),
                dest.display()
            );

            if let Some(previous) = previous {
                self.remove_stale_keyframes(snapshot.id(), &previous);
            }
            Ok(())
        })
    }

    /// Loads the persisted snapshot, if any.
    ///
    /// Fails with `CorruptStore`/`EmptyIndex` if the stored halves do not
    /// line up. The model identity is returned as stored; callers compare it
    /// with the model they query with.
    pub fn load(&self) -> CoreResult<Option<Snapshot>> {
        if !self.exists() {
            return Ok(None);
        }

        let snapshot = self.with_lock(false, || read_database(&self.db_path()))?;

        debug!(
            "Loaded snapshot {} ({} frames, model {})",
            snapshot.id(),
            snapshot.len(),
            snapshot.model()
        );
        Ok(Some(snapshot))
    }

    /// Removes keyframe folders other than `keep` whose id does not sort
    /// after `replaced`. Snapshot ids are ULIDs, so string order is creation
    /// order. Callers hold the exclusive lock.
    fn remove_stale_keyframes(&self, keep: &str, replaced: &str) {
        let root = self.dir.join(KEYFRAMES_DIR);
        let Ok(entries) = std::fs::read_dir(&root) else {
            return;
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == keep {
                continue;
            }
            if name.as_ref() <= replaced {
                remove_dir_best_effort(&entry.path());
            } else {
                debug!("Keeping keyframe folder {} newer than snapshot {}", name, replaced);
            }
        }
    }
}

// =============================================================================
// SQLite Encoding
// =============================================================================

const SCHEMA: &str = r#"
    -- Single row describing the snapshot, including the serialized index
    CREATE TABLE IF NOT EXISTS snapshot (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        snapshot_id TEXT NOT NULL,
        format_version INTEGER NOT NULL,
        model_id TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        frame_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        vector_index BLOB NOT NULL
    );

    -- Frame store, one row per index position
    CREATE TABLE IF NOT EXISTS frames (
        ordinal INTEGER PRIMARY KEY,
        source_path TEXT NOT NULL,
        source_index INTEGER NOT NULL,
        timestamp_sec REAL NOT NULL,
        transcript TEXT NOT NULL
    );
"#;

fn write_database(path: &Path, snapshot: &Snapshot) -> CoreResult<()> {
    let mut conn = Connection::open(path)
        .map_err(|e| CoreError::Internal(format!("Failed to create snapshot database: {}", e)))?;
    conn.execute_batch(SCHEMA)
        .map_err(|e| CoreError::Internal(format!("Failed to initialize schema: {}", e)))?;

    let meta = snapshot.meta();
    let tx = conn.transaction()?;
    tx.execute(
        r#"
        INSERT INTO snapshot (id, snapshot_id, format_version, model_id, dimension, frame_count, created_at, vector_index)
        VALUES (1, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            meta.id,
            meta.format_version,
            meta.model.id,
            meta.model.dimension as i64,
            meta.frame_count as i64,
            meta.created_at.to_rfc3339(),
            snapshot.index().to_bytes(),
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO frames (ordinal, source_path, source_index, timestamp_sec, transcript)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )?;
        for frame in snapshot.store().iter() {
            stmt.execute(params![
                frame.ordinal as i64,
                frame.source_path.to_string_lossy().into_owned(),
                frame.source_index as i64,
                frame.timestamp_sec,
                frame.transcript,
            ])?;
        }
    }

    tx.commit()?;
    conn.close()
        .map_err(|(_, e)| CoreError::Internal(format!("Failed to close snapshot database: {}", e)))?;
    Ok(())
}

/// Id of the snapshot stored at `path`, if it can be read
fn stored_snapshot_id(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
    conn.query_row("SELECT snapshot_id FROM snapshot WHERE id = 1", [], |row| {
        row.get::<_, String>(0)
    })
    .optional()
    .ok()
    .flatten()
}

fn read_database(path: &Path) -> CoreResult<Snapshot> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| CoreError::CorruptStore(format!("Failed to open snapshot database: {}", e)))?;

    let row = conn
        .query_row(
            r#"
            SELECT snapshot_id, format_version, model_id, dimension, frame_count, created_at, vector_index
            FROM snapshot WHERE id = 1
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Vec<u8>>(6)?,
                ))
            },
        )
        .optional()
        .map_err(|e| CoreError::CorruptStore(format!("Failed to read snapshot row: {}", e)))?
        .ok_or_else(|| CoreError::CorruptStore("snapshot row is missing".to_string()))?;

    let (snapshot_id, format_version, model_id, dimension, frame_count, created_at, blob) = row;

    if format_version != i64::from(SNAPSHOT_FORMAT_VERSION) {
        return Err(CoreError::CorruptStore(format!(
            "unsupported snapshot format version {}",
            format_version
        )));
    }

    let dimension = to_usize(dimension, "dimension")?;
    let frame_count = to_usize(frame_count, "frame_count")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::CorruptStore(format!("invalid created_at: {}", e)))?;

    let index = VectorIndex::from_bytes(&blob)?;
    let store = FrameStore::from_frames(read_frames(&conn)?)?;

    if index.is_empty() {
        return Err(CoreError::EmptyIndex);
    }
    if index.len() != frame_count || store.len() != frame_count {
        return Err(CoreError::CorruptStore(format!(
            "snapshot records {} frames, index has {}, store has {}",
            frame_count,
            index.len(),
            store.len()
        )));
    }
    if index.dimension() != dimension {
        return Err(CoreError::CorruptStore(format!(
            "snapshot records {}d vectors, index has {}d",
            dimension,
            index.dimension()
        )));
    }

    Ok(Snapshot {
        meta: SnapshotMeta {
            id: snapshot_id,
            format_version: SNAPSHOT_FORMAT_VERSION,
            model: ModelIdentity::new(model_id, dimension),
            frame_count,
            created_at,
        },
        index,
        store,
    })
}

fn read_frames(conn: &Connection) -> CoreResult<Vec<Frame>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT ordinal, source_path, source_index, timestamp_sec, transcript
            FROM frames
            ORDER BY ordinal
            "#,
        )
        .map_err(|e| CoreError::CorruptStore(format!("Failed to read frames: {}", e)))?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut frames = Vec::new();
    for row in rows {
        let (ordinal, source_path, source_index, timestamp_sec, transcript) = row?;
        frames.push(Frame {
            ordinal: to_usize(ordinal, "ordinal")?,
            source_path: PathBuf::from(source_path),
            source_index: u64::try_from(source_index).map_err(|_| {
                CoreError::CorruptStore(format!("negative source_index {}", source_index))
            })?,
            timestamp_sec,
            transcript,
        });
    }
    Ok(frames)
}

fn to_usize(value: i64, field: &str) -> CoreResult<usize> {
    usize::try_from(value)
        .map_err(|_| CoreError::CorruptStore(format!("invalid {}: {}", field, value)))
}

// =============================================================================
// Tests
// =============================================================================
