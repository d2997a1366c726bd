//! The sync controller: periodic full/incremental reconciliation between
//! Provider results and the metadata store.

pub mod folder_spec;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use self::folder_spec::FolderSpec;
use crate::config::Config;
use crate::error::CoreResult;
use crate::provider::{ChangeEvent, ChangeSet, PhotoRecord, Provider};
use crate::store::models::PhotoUpsert;
use crate::store::{photo_repo, settings_repo, NEEDS_FULL_RESCAN_KEY, SYNC_CURSOR_KEY};

const SCAN_BATCH_SIZE: usize = 200;

pub struct SyncController {
    pool: SqlitePool,
    provider: Arc<dyn Provider>,
    specs: Vec<FolderSpec>,
    config: Arc<Config>,
}

impl SyncController {
    pub fn new(pool: SqlitePool, provider: Arc<dyn Provider>, config: Arc<Config>) -> Self {
        let specs = config.provider_config.folders.iter().map(FolderSpec::from).collect();
        Self { pool, provider, specs, config }
    }

    /// Decide full vs. incremental based on persisted state, then run it.
    pub async fn run(&self) -> CoreResult<()> {
        let needs_full = settings_repo::get_bool(&self.pool, NEEDS_FULL_RESCAN_KEY, true).await?;
        let has_cursor = settings_repo::get(&self.pool, SYNC_CURSOR_KEY).await?.is_some();

        if needs_full || !has_cursor {
            log::info!("sync: running full scan (needs_full_rescan={needs_full}, has_cursor={has_cursor})");
            self.full_scan().await
        } else {
            log::info!("sync: running incremental scan");
            self.incremental_scan().await
        }
    }

    pub async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.scan_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run().await {
                        log::error!("sync pass failed: {e}");
                    }
                }
                _ = token.cancelled() => {
                    log::info!("sync controller stopping");
                    break;
                }
            }
        }
    }

    /// Recursively list every configured folder, upsert everything found,
    /// then tombstone anything belonging to this provider not revisited by
    /// this scan. Finishes by acquiring a fresh cursor for incremental mode.
    async fn full_scan(&self) -> CoreResult<()> {
        let scan_start = chrono::Utc::now().timestamp();
        let mut seen = std::collections::HashSet::new();

        for spec in &self.specs {
            let mut stream = self.provider.scan_folder(spec.root_id(), spec.depth).await?;
            let mut batch: Vec<PhotoUpsert> = Vec::new();

            while let Some(record) = stream.next().await {
                let record = record?;
                if !seen.insert(record.id.clone()) {
                    continue; // union across specs: first occurrence wins
                }
                batch.push(to_upsert(&record, scan_start, self.provider.provider_name()));
                if batch.len() >= SCAN_BATCH_SIZE {
                    photo_repo::batch_upsert(&self.pool, &batch).await?;
                    batch.clear();
                }
            }
            if !batch.is_empty() {
                photo_repo::batch_upsert(&self.pool, &batch).await?;
            }
        }

        photo_repo::tombstone_stale(&self.pool, self.provider.provider_name(), scan_start).await?;

        let cursor = self.provider.initial_cursor().await?;
        settings_repo::set(&self.pool, SYNC_CURSOR_KEY, &cursor).await?;
        settings_repo::set_bool(&self.pool, NEEDS_FULL_RESCAN_KEY, false).await?;
        Ok(())
    }

    /// Apply everything changed since the persisted cursor, filtering
    /// created/updated photos by the ancestor-check, then persist the new
    /// cursor only once the whole page has applied cleanly.
    async fn incremental_scan(&self) -> CoreResult<()> {
        let cursor = settings_repo::get(&self.pool, SYNC_CURSOR_KEY).await?.unwrap_or_default();
        let ChangeSet { mut changes, next_cursor } = self.provider.changes_since(&cursor).await?;

        while let Some(event) = changes.next().await {
            match event? {
                ChangeEvent::Created(record) | ChangeEvent::Updated(record) => {
                    let under_spec =
                        folder_spec::is_under_any_spec(&self.provider, &record.parent_folder_id, &self.specs)
                            .await?;
                    if under_spec {
                        let now = chrono::Utc::now().timestamp();
                        let upsert = to_upsert(&record, now, self.provider.provider_name());
                        photo_repo::upsert(&self.pool, &upsert).await?;
                    }
                }
                ChangeEvent::Deleted(photo_id) => {
                    photo_repo::tombstone(&self.pool, &photo_id).await?;
                }
            }
        }

        settings_repo::set(&self.pool, SYNC_CURSOR_KEY, &next_cursor).await?;
        Ok(())
    }
}

fn to_upsert(record: &PhotoRecord, scan_time: i64, provider_id: &str) -> PhotoUpsert {
    PhotoUpsert {
        photo_id: record.id.clone(),
        provider_id: provider_id.to_string(),
        parent_folder_id: record.parent_folder_id.clone(),
        filename: record.filename.clone(),
        created_at: record.created_at,
        width: record.width.map(|w| w as i64),
        height: record.height.map(|h| h as i64),
        scan_time,
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
