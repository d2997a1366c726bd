//! The display scheduler: on each tick, picks the least-recently-shown
//! cached photo and emits it to the front-end, guaranteeing no repeats
//! within a cycle.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::CoreResult;
use crate::frontend::{FrameEvent, FrameSender};
use crate::store::models::CacheState;
use crate::store::photo_repo;

pub struct DisplayScheduler {
    pool: SqlitePool,
    config: Arc<Config>,
    frame_tx: FrameSender,
}

impl DisplayScheduler {
    pub fn new(pool: SqlitePool, config: Arc<Config>, frame_tx: FrameSender) -> Self {
        Self { pool, config, frame_tx }
    }

    pub async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.update_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_tick().await {
                        log::error!("display tick failed: {e}");
                    }
                }
                _ = token.cancelled() => {
                    log::info!("display scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Run one tick. Returns the frame emitted, or `None` if there was
    /// nothing to show (an empty cache is not an error).
    pub async fn run_tick(&self) -> CoreResult<Option<FrameEvent>> {
        self.maybe_reshuffle().await?;

        let row = match photo_repo::select_display_candidate(&self.pool).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        let bytes = match row.cache_state() {
            CacheState::File { path, .. } => match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("cache file missing for {}: {e}, clearing row", row.photo_id);
                    photo_repo::clear_cache_fields(&self.pool, &row.photo_id).await?;
                    return Ok(None);
                }
            },
            CacheState::Blob { .. } => row.cached_data.clone().unwrap_or_default(),
            CacheState::Uncached => return Ok(None),
        };

        let event = FrameEvent {
            photo_id: row.photo_id.clone(),
            bytes,
            filename: row.filename.clone(),
            created_at: row.created_at,
            width: row.width.map(|w| w as u32),
            height: row.height.map(|h| h as u32),
        };

        if let Err(e) = self.frame_tx.send(event.clone()).await {
            log::warn!("frame channel closed, front-end gone? {e}");
        }

        let now = chrono::Utc::now().timestamp();
        photo_repo::update_last_viewed(&self.pool, &row.photo_id, now).await?;

        Ok(Some(event))
    }

    /// Zero every `last_viewed_at` once the cycle has drained: no cached
    /// photo remains whose last showing predates half a display interval
    /// ago. Vacuously a no-op when the cache is empty.
    async fn maybe_reshuffle(&self) -> CoreResult<()> {
        let interval_secs = ((self.config.update_interval_ms / 1000) as i64).max(1);
        let cutoff = chrono::Utc::now().timestamp() - interval_secs / 2;

        if photo_repo::count_stale_or_unseen(&self.pool, cutoff).await? == 0 {
            log::debug!("display: cycle complete, reshuffling");
            photo_repo::reshuffle_last_viewed(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
