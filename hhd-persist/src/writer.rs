//! Diff-gated atomic writer.
//!
//! ## `atomic_write` protocol
//!
//! 1. Render content (already done by caller).
//! 2. SHA-256 hash the rendered content.
//! 3. Compare with the last digest recorded for the path; when none is
//!    recorded, hash whatever is currently on disk instead.
//! 4. Skip if identical.
//! 5. Write to `<path>.hhd.tmp`.
//! 6. Rename to final path (atomic on POSIX).
//! 7. Record the new digest.
//!
//! The returned [`WriteResult`] tells the caller whether the disk actually
//! changed, which drives ownership fix-ups and lets the daemon recognise
//! the file-change notifications caused by its own saves.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, PersistError};

/// Maps a file path to the SHA-256 hex digest of the content last known to
/// be on disk there.
pub type HashStore = HashMap<PathBuf, String>;

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File was skipped; rendered content matches what is on disk.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path } | WriteResult::Unchanged { path } => path,
        }
    }
}

/// Atomically write `content` to `path` unless the disk already holds it.
pub fn atomic_write(
    path: &Path,
    content: &str,
    store: &mut HashStore,
) -> Result<WriteResult, PersistError> {
    let tmp = tmp_path(path);
    atomic_write_with_tmp(path, content, store, &tmp)
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.hhd.tmp", path.display()))
}

fn atomic_write_with_tmp(
    path: &Path,
    content: &str,
    store: &mut HashStore,
    tmp: &Path,
) -> Result<WriteResult, PersistError> {
    // Normalise line endings to LF before hashing and writing.
    let normalized = content.replace("\r\n", "\n");
    let content = normalized.as_str();
    let digest = sha256_hex(content.as_bytes());

    let on_disk = match store.get(path) {
        Some(stored) => Some(stored.clone()),
        None => disk_digest(path)?,
    };
    if on_disk.as_deref() == Some(digest.as_str()) {
        tracing::debug!(path = %path.display(), "unchanged");
        store.insert(path.to_path_buf(), digest);
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    store.insert(path.to_path_buf(), digest);
    tracing::info!(path = %path.display(), "wrote");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

fn disk_digest(path: &Path) -> Result<Option<String>, PersistError> {
    match std::fs::read_to_string(path) {
        Ok(existing) => Ok(Some(sha256_hex(existing.replace("\r\n", "\n").as_bytes()))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}
