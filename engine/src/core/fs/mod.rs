//! Filesystem utilities.
//!
//! Crash-tolerant write primitives for the persisted snapshot.
//!
//! - The snapshot database is the only durable state; a partial write must
//!   never replace a complete one.
//! - Windows semantics differ from Unix for rename-over-existing; we handle both.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Path Validation
// =============================================================================

/// Validates and resolves a local file path used as pipeline input.
///
/// - Rejects empty paths
/// - Rejects remote URLs (http://, https://, any scheme)
/// - Verifies the file exists and is a regular file
pub fn validate_local_input_path(path: &str, label: &str) -> Result<PathBuf, String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(format!("{label} is empty"));
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Err(format!("{label} must be a local file path, not a URL"));
    }
    if lower.contains("://") {
        return Err(format!("{label} must be a local file path"));
    }

    let pb = PathBuf::from(trimmed);
    let meta =
        std::fs::metadata(&pb).map_err(|_| format!("{label} file not found: {}", pb.display()))?;
    if !meta.is_file() {
        return Err(format!("{label} is not a file: {}", pb.display()));
    }

    Ok(pb)
}

// =============================================================================
// Advisory Locks
// =============================================================================

/// Runs `op` holding an `fs2` lock on `lock_path`: shared for readers,
/// exclusive for writers. The lock file is created if missing.
pub fn with_file_lock<T>(
    lock_path: &Path,
    exclusive: bool,
    op: impl FnOnce() -> CoreResult<T>,
) -> CoreResult<T> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;

    if exclusive {
        fs2::FileExt::lock_exclusive(&lock_file)?;
    } else {
        fs2::FileExt::lock_shared(&lock_file)?;
    }

    let result = op();

    if let Err(e) = fs2::FileExt::unlock(&lock_file) {
        tracing::warn!("Failed to unlock {}: {}", lock_path.display(), e);
    }
    result
}

// =============================================================================
// Atomic Writes
// =============================================================================

/// Write bytes atomically: temp file, fsync, rename over the destination.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    atomic_replace(path, &tmp_path)
}

/// Write a JSON file atomically with pretty formatting.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Sibling path used for staging a write to `path`
pub fn tmp_path_for(path: &Path) -> PathBuf {
    sibling_with_suffix(path, "tmp")
}

fn bak_path_for(path: &Path) -> PathBuf {
    sibling_with_suffix(path, "bak")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut out = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| suffix.to_string());
    out.set_file_name(format!("{file_name}.{suffix}"));
    out
}

/// Moves a fully written `src_tmp` over `dest`.
///
/// On failure the previous `dest` is restored and `src_tmp` removed.
pub fn atomic_replace(dest: &Path, src_tmp: &Path) -> CoreResult<()> {
    if !dest.exists() {
        std::fs::rename(src_tmp, dest)?;
        return Ok(());
    }

    if !cfg!(windows) {
        // rename(2) replaces the destination atomically.
        if let Err(e) = std::fs::rename(src_tmp, dest) {
            let _ = std::fs::remove_file(src_tmp);
            return Err(CoreError::IoError(e));
        }
        return Ok(());
    }

    // Windows: rename-over-existing may fail depending on filesystem; use a backup swap.
    let bak = bak_path_for(dest);
    if bak.exists() {
        let _ = std::fs::remove_file(&bak);
    }

    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            let _ = std::fs::remove_file(src_tmp);
            Err(CoreError::IoError(e))
        }
    }
}

/// Removes a directory tree, logging instead of failing.
pub fn remove_dir_best_effort(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        tracing::warn!("Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_bytes_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.json");

        atomic_write_bytes(&path, b"one").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one");

        atomic_write_bytes(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn atomic_replace_swaps_staged_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("snapshot.db");
        let staged = tmp_path_for(&dest);

        std::fs::write(&dest, b"old").unwrap();
        std::fs::write(&staged, b"new").unwrap();
        atomic_replace(&dest, &staged).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        assert!(!staged.exists());
    }

    #[test]
    fn tmp_path_keeps_directory() {
        let p = Path::new("/data/snapshot.db");
        assert_eq!(tmp_path_for(p), PathBuf::from("/data/snapshot.db.tmp"));
    }

    #[test]
    fn validate_local_input_path_rejects_urls_and_missing_files() {
        assert!(validate_local_input_path("", "video").is_err());
        assert!(validate_local_input_path("https://x/y.mp4", "video")
            .unwrap_err()
            .contains("not a URL"));
        assert!(validate_local_input_path("s3://bucket/y.mp4", "video").is_err());
        assert!(validate_local_input_path("/definitely/missing.mp4", "video")
            .unwrap_err()
            .contains("not found"));
    }

    #[test]
    fn validate_local_input_path_accepts_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"bytes").unwrap();

        let resolved = validate_local_input_path(&path.to_string_lossy(), "video").unwrap();
        assert_eq!(resolved, path);
        assert!(validate_local_input_path(&dir.path().to_string_lossy(), "video").is_err());
    }

    #[test]
    fn with_file_lock_creates_lock_and_returns_result() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("nested").join("state.lock");

        let value = with_file_lock(&lock, true, || Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert!(lock.exists());

        let err = with_file_lock(&lock, false, || -> CoreResult<()> {
            Err(CoreError::Internal("boom".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }

    #[test]
    fn remove_dir_best_effort_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("keyframes");
        remove_dir_best_effort(&target);

        std::fs::create_dir_all(target.join("nested")).unwrap();
        remove_dir_best_effort(&target);
        assert!(!target.exists());
    }
}
