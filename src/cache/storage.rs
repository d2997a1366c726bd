//! Physical persistence for a normalized photo, in either of the two
//! storage modes chosen at process start.

use std::path::{Path, PathBuf};

use crate::fs_utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    File,
    Blob,
}

impl StorageMode {
    pub fn from_config(use_blob_storage: bool) -> Self {
        if use_blob_storage {
            StorageMode::Blob
        } else {
            StorageMode::File
        }
    }
}

/// Outcome of persisting normalized bytes, in a shape the store layer can
/// write straight into the matching `cached_*` columns.
pub enum Persisted {
    File { path: String, size_bytes: i64 },
    Blob { mime: String, size_bytes: i64 },
}

/// Write `data` to `<cache_dir>/<photo_id>.jpg` via a temp sibling plus
/// atomic rename, so a crash mid-write never leaves a half-written file at
/// the final path.
pub fn write_file(cache_dir: &Path, photo_id: &str, data: &[u8]) -> std::io::Result<Persisted> {
    std::fs::create_dir_all(cache_dir)?;
    let final_path = cache_dir.join(format!("{photo_id}.jpg"));
    let temp_path = cache_dir.join(format!("{photo_id}.jpg.tmp"));

    std::fs::write(&temp_path, data)?;
    fs_utils::rename_atomic(&temp_path, &final_path)?;

    Ok(Persisted::File {
        path: final_path.to_string_lossy().into_owned(),
        size_bytes: data.len() as i64,
    })
}

/// "Persist" in blob mode is trivial: the bytes are handed straight to the
/// store layer for the `cached_data` column.
pub fn prepare_blob(data: &[u8]) -> Persisted {
    Persisted::Blob {
        mime: "image/jpeg".to_string(),
        size_bytes: data.len() as i64,
    }
}

/// Remove a file-mode cache entry's backing file, tolerating "already
/// gone" (a prior crash may have completed the unlink but not the row
/// update).
pub fn remove_file(path: &str) -> std::io::Result<()> {
    fs_utils::remove_file_tolerant(Path::new(path))
}

/// List every regular file directly under `cache_dir` — used by the
/// orphan sweep (a file with no matching `cached_path` row).
pub fn list_cache_files(cache_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !cache_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(cache_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}
