//! Row types for the `photo` and `setting` tables.

use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PhotoRow {
    pub photo_id: String,
    pub provider_id: String,
    pub parent_folder_id: String,
    pub filename: String,
    pub created_at: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub first_seen_at: i64,
    pub last_seen_in_scan_at: i64,
    pub tombstoned: bool,
    pub last_viewed_at: Option<i64>,
    pub cached_path: Option<String>,
    pub cached_data: Option<Vec<u8>>,
    pub cached_mime: Option<String>,
    pub cached_size_bytes: Option<i64>,
    pub cached_at: Option<i64>,
}

/// The three mutually-exclusive cache shapes a [`PhotoRow`] can be in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Uncached,
    File { path: String, size_bytes: i64 },
    Blob { mime: String, size_bytes: i64 },
}

impl PhotoRow {
    pub fn cache_state(&self) -> CacheState {
        match (&self.cached_path, &self.cached_data, self.cached_size_bytes) {
            (Some(path), None, Some(size)) => CacheState::File {
                path: path.clone(),
                size_bytes: size,
            },
            (None, Some(_), Some(size)) => CacheState::Blob {
                mime: self.cached_mime.clone().unwrap_or_default(),
                size_bytes: size,
            },
            _ => CacheState::Uncached,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached_size_bytes.is_some()
    }
}

/// A single row awaiting insertion/update, produced by the Sync Controller
/// from a `PhotoRecord` plus bookkeeping timestamps.
pub struct PhotoUpsert {
    pub photo_id: String,
    pub provider_id: String,
    pub parent_folder_id: String,
    pub filename: String,
    pub created_at: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub scan_time: i64,
}
