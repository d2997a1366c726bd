//! The metadata store: one SQLite database tracking every photo known to
//! the running frame, plus the small KV table of scan cursors and flags.
//!
//! Opening the store runs migrations and, if the database file is present
//! but unreadable, deletes it and starts fresh rather than failing the
//! whole process. No backup or salvage: a corrupt store is gone, and the
//! next sync is a full rescan.

pub mod models;
pub mod photo_repo;
pub mod settings_repo;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, CoreResult};

/// Setting key the sync controller checks at startup: set whenever the
/// store had to be rebuilt, so the next scan knows it can't trust an
/// incremental cursor and must run a full scan instead.
pub const NEEDS_FULL_RESCAN_KEY: &str = "sync.needs_full_rescan";
/// Setting key holding the provider's opaque incremental-scan cursor.
pub const SYNC_CURSOR_KEY: &str = "sync.cursor";

const INTEGRITY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

fn append_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if absent) the database at `path`, running migrations
    /// and an integrity check. A corrupt or unmigratable file is deleted
    /// outright and replaced by a fresh one; in that case
    /// `sync.needs_full_rescan` is left set so callers know to treat the
    /// store as empty history rather than a crash.
    pub async fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = match Self::try_open(path).await {
            Ok(pool) => pool,
            Err(e) => {
                log::error!("metadata store at {} unusable ({e}), deleting and recreating", path.display());
                Self::delete_backing_files(path)?;
                let pool = Self::try_open(path)
                    .await
                    .map_err(|e| CoreError::StoreIntegrity(e.to_string()))?;
                settings_repo::set_bool(&pool, NEEDS_FULL_RESCAN_KEY, true).await?;
                pool
            }
        };

        Ok(Self { pool })
    }

    async fn try_open(path: &Path) -> Result<SqlitePool, sqlx::Error> {
        let opts = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Self::integrity_check(&pool).await?;
        Ok(pool)
    }

    async fn integrity_check(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let row = tokio::time::timeout(INTEGRITY_CHECK_TIMEOUT, sqlx::query("PRAGMA quick_check").fetch_one(pool))
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)??;
        let result: String = row.get(0);
        if result == "ok" {
            Ok(())
        } else {
            Err(sqlx::Error::Protocol(format!("quick_check failed: {result}")))
        }
    }

    /// Delete the database file and its WAL/SHM sidecars, if present. No
    /// backup, no salvage from elsewhere: a corrupt store is discarded
    /// entirely and the next sync starts from a full rescan.
    fn delete_backing_files(path: &Path) -> CoreResult<()> {
        for candidate in [
            path.to_path_buf(),
            append_suffix(path, "-wal"),
            append_suffix(path, "-shm"),
        ] {
            match std::fs::remove_file(&candidate) {
                Ok(()) => log::warn!("deleted corrupt store file {}", candidate.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flush WAL state and release connections cleanly on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_file_and_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = MetadataStore::open(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(photo_repo::sum_cached_bytes(store.pool()).await.unwrap(), 0);
        store.close().await;
    }

    #[tokio::test]
    async fn reopening_existing_store_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let store = MetadataStore::open(&path).await.unwrap();
            settings_repo::set(store.pool(), "sync.cursor", "cursor-1").await.unwrap();
            store.close().await;
        }

        let store = MetadataStore::open(&path).await.unwrap();
        assert_eq!(
            settings_repo::get(store.pool(), "sync.cursor").await.unwrap(),
            Some("cursor-1".to_string())
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_deleted_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        std::fs::write(&path, b"this is not a sqlite database").unwrap();

        let store = MetadataStore::open(&path).await.unwrap();
        assert!(
            settings_repo::get_bool(store.pool(), NEEDS_FULL_RESCAN_KEY, false).await.unwrap()
        );

        // No backup left behind: only the freshly recreated store file exists.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(!entries.iter().any(|name| name.contains("corrupt")));
    }
}
