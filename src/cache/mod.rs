//! The cache engine: tick-driven prefetch, bounded total size, LRU-style
//! eviction, and cooling-off after sustained download failure.

pub mod normalize;
pub mod storage;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use self::normalize::{normalize as normalize_image, NormalizeParams};
use self::storage::{Persisted, StorageMode};
use crate::config::Config;
use crate::provider::Provider;
use crate::store::models::PhotoRow;
use crate::store::photo_repo;

const HEADROOM_BYTES: i64 = 10 * 1024 * 1024;
const MAX_RAW_BYTES: usize = 50 * 1024 * 1024;
const MIN_RAW_BYTES: usize = 1024;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const COOLING_THRESHOLD: u32 = 3;
const COOLING_DURATION: Duration = Duration::from_secs(60);
const EVICTION_PAGE: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Idle,
    Ticking,
    Cooling,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success(String),
    NetworkFail(String),
    ValidationFail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    SingleFlightDropped,
    Cooling,
    Completed { evicted_bytes: i64, downloads: Vec<DownloadOutcome> },
}

enum DownloadFailure {
    Network(String),
    Validation(String),
}

pub struct CacheEngine {
    pool: SqlitePool,
    provider: Arc<dyn Provider>,
    config: Arc<Config>,
    cache_dir: PathBuf,
    storage_mode: StorageMode,
    single_flight: Mutex<()>,
    state: StdMutex<TickState>,
    consecutive_failed_ticks: AtomicU32,
    cooling_until: StdMutex<Option<Instant>>,
    shutdown: CancellationToken,
}

impl CacheEngine {
    pub fn new(pool: SqlitePool, provider: Arc<dyn Provider>, config: Arc<Config>) -> Self {
        Self::with_shutdown(pool, provider, config, CancellationToken::new())
    }

    /// Build an engine whose in-flight downloads are cancelled the moment
    /// `shutdown` fires, rather than only between ticks.
    pub fn with_shutdown(
        pool: SqlitePool,
        provider: Arc<dyn Provider>,
        config: Arc<Config>,
        shutdown: CancellationToken,
    ) -> Self {
        let cache_dir = config.cache_path.clone();
        let storage_mode = StorageMode::from_config(config.use_blob_storage);
        Self {
            pool,
            provider,
            config,
            cache_dir,
            storage_mode,
            single_flight: Mutex::new(()),
            state: StdMutex::new(TickState::Idle),
            consecutive_failed_ticks: AtomicU32::new(0),
            cooling_until: StdMutex::new(None),
            shutdown,
        }
    }

    pub fn state(&self) -> TickState {
        *self.state.lock().unwrap()
    }

    /// Periodic loop driven by the runtime: fires a tick on every interval,
    /// stopping cleanly when `token` is cancelled.
    pub async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.cache_tick_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.run_tick().await;
                    log::debug!("cache tick finished: {outcome:?}");
                }
                _ = token.cancelled() => {
                    *self.state.lock().unwrap() = TickState::Stopped;
                    log::info!("cache engine stopping");
                    break;
                }
            }
        }
    }

    /// Run exactly one tick, honoring single-flight (a tick already in
    /// progress causes this call to be dropped rather than queued).
    pub async fn run_tick(&self) -> TickOutcome {
        let _guard = match self.single_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("cache tick already in progress, dropping this fire");
                return TickOutcome::SingleFlightDropped;
            }
        };
        *self.state.lock().unwrap() = TickState::Ticking;

        let evicted_bytes = match self.evict_if_needed().await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("eviction pass failed: {e}");
                0
            }
        };

        if self.is_cooling() {
            *self.state.lock().unwrap() = TickState::Cooling;
            return TickOutcome::Cooling;
        }

        let downloads = self.prefetch().await;
        self.update_failure_streak(&downloads);

        *self.state.lock().unwrap() = TickState::Idle;
        TickOutcome::Completed { evicted_bytes, downloads }
    }

    fn is_cooling(&self) -> bool {
        let mut guard = self.cooling_until.lock().unwrap();
        match *guard {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *guard = None;
                self.consecutive_failed_ticks.store(0, Ordering::SeqCst);
                false
            }
            None => false,
        }
    }

    fn update_failure_streak(&self, downloads: &[DownloadOutcome]) {
        if downloads.is_empty() {
            return;
        }
        let any_success = downloads.iter().any(|d| matches!(d, DownloadOutcome::Success(_)));
        if any_success {
            self.consecutive_failed_ticks.store(0, Ordering::SeqCst);
            return;
        }
        let failures = self.consecutive_failed_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= COOLING_THRESHOLD {
            log::warn!("{failures} consecutive failed ticks, entering cooling for {COOLING_DURATION:?}");
            *self.cooling_until.lock().unwrap() = Some(Instant::now() + COOLING_DURATION);
        }
    }

    /// Release every tombstoned photo's cache resource regardless of the
    /// byte cap, then evict oldest-shown-first until back under the cap
    /// with headroom to spare.
    async fn evict_if_needed(&self) -> Result<i64, sqlx::Error> {
        let mut freed = 0i64;

        for row in photo_repo::select_tombstoned_cached(&self.pool).await? {
            freed += self.release_cache_resource(&row).await?;
        }

        let max_bytes = self.config.max_cache_bytes() as i64;
        let target = max_bytes - HEADROOM_BYTES;
        let mut total = photo_repo::sum_cached_bytes(&self.pool).await?;

        while total > max_bytes {
            let candidates = photo_repo::select_eviction_candidates(&self.pool, EVICTION_PAGE).await?;
            if candidates.is_empty() {
                break;
            }
            let mut evicted_any = false;
            for row in candidates {
                if total <= target {
                    break;
                }
                let size = row.cached_size_bytes.unwrap_or(0);
                freed += self.release_cache_resource(&row).await?;
                total -= size;
                evicted_any = true;
            }
            if !evicted_any {
                break;
            }
        }

        Ok(freed)
    }

    async fn release_cache_resource(&self, row: &PhotoRow) -> Result<i64, sqlx::Error> {
        let size = row.cached_size_bytes.unwrap_or(0);
        if let Some(path) = &row.cached_path {
            if let Err(e) = storage::remove_file(path) {
                log::warn!("failed to remove cache file {path}: {e}");
            }
        }
        photo_repo::clear_cache_fields(&self.pool, &row.photo_id).await?;
        Ok(size)
    }

    async fn prefetch(&self) -> Vec<DownloadOutcome> {
        let limit = self.config.prefetch_batch_size as i64;
        let candidates = match photo_repo::select_prefetch_candidates(&self.pool, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("failed to select prefetch candidates: {e}");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            return Vec::new();
        }

        let semaphore = Semaphore::new(self.config.prefetch_batch_size);
        futures_util::stream::iter(candidates)
            .map(|row| async {
                let photo_id = row.photo_id.clone();
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        log::debug!("shutdown requested, cancelling in-flight download of {photo_id}");
                        DownloadOutcome::NetworkFail(photo_id)
                    }
                    outcome = self.download_one(row) => outcome,
                }
            })
            .buffer_unordered(self.config.prefetch_batch_size)
            .collect()
            .await
    }

    async fn download_one(&self, row: PhotoRow) -> DownloadOutcome {
        let photo_id = row.photo_id.clone();
        match self.download_and_store(&row).await {
            Ok(()) => DownloadOutcome::Success(photo_id),
            Err(DownloadFailure::Network(msg)) => {
                log::warn!("download failed for {photo_id}: {msg}");
                DownloadOutcome::NetworkFail(photo_id)
            }
            Err(DownloadFailure::Validation(msg)) => {
                log::warn!("validation failed for {photo_id}: {msg}, tombstoning");
                if let Err(e) = photo_repo::tombstone(&self.pool, &photo_id).await {
                    log::error!("failed to tombstone {photo_id}: {e}");
                }
                DownloadOutcome::ValidationFail(photo_id)
            }
        }
    }

    async fn download_and_store(&self, row: &PhotoRow) -> Result<(), DownloadFailure> {
        let mut stream = self
            .provider
            .download_content(&row.photo_id, DOWNLOAD_TIMEOUT)
            .await
            .map_err(|e| DownloadFailure::Network(e.to_string()))?;

        let mut raw = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadFailure::Network(e.to_string()))?;
            raw.extend_from_slice(&chunk);
            if raw.len() > MAX_RAW_BYTES {
                return Err(DownloadFailure::Validation(format!(
                    "raw download exceeded {MAX_RAW_BYTES} byte cap"
                )));
            }
        }

        let final_bytes = self.normalize(raw).await?;
        if final_bytes.len() < MIN_RAW_BYTES {
            return Err(DownloadFailure::Validation(format!(
                "output too small ({} bytes)",
                final_bytes.len()
            )));
        }

        let persisted = self.persist(&row.photo_id, &final_bytes).await?;
        let now = chrono::Utc::now().timestamp();
        match persisted {
            Persisted::File { path, size_bytes } => {
                photo_repo::update_cache_file(&self.pool, &row.photo_id, &path, size_bytes, now)
                    .await
                    .map_err(|e| DownloadFailure::Network(format!("store update: {e}")))?;
            }
            Persisted::Blob { mime, size_bytes } => {
                photo_repo::update_cache_blob(&self.pool, &row.photo_id, &final_bytes, &mime, now)
                    .await
                    .map_err(|e| DownloadFailure::Network(format!("store update: {e}")))?;
                let _ = size_bytes;
            }
        }
        Ok(())
    }

    /// Decode, validate and re-encode the raw bytes. `image` is a mandatory,
    /// always-linked dependency here, so any failure — unsupported format,
    /// garbage/truncated bytes, out-of-bounds dimensions — is a genuine
    /// validation failure, never a "processor unavailable" fallback.
    async fn normalize(&self, raw: Vec<u8>) -> Result<Vec<u8>, DownloadFailure> {
        let params = NormalizeParams {
            show_width: self.config.show_width,
            show_height: self.config.show_height,
            jpeg_quality: self.config.jpeg_quality,
        };

        let result = tokio::task::spawn_blocking(move || normalize_image(&raw, &params))
            .await
            .map_err(|e| DownloadFailure::Validation(format!("normalize task panicked: {e}")))?;

        result.map_err(|e| DownloadFailure::Validation(e.to_string()))
    }

    async fn persist(&self, photo_id: &str, bytes: &[u8]) -> Result<Persisted, DownloadFailure> {
        match self.storage_mode {
            StorageMode::File => {
                let dir = self.cache_dir.clone();
                let photo_id = photo_id.to_string();
                let bytes = bytes.to_vec();
                tokio::task::spawn_blocking(move || storage::write_file(&dir, &photo_id, &bytes))
                    .await
                    .map_err(|e| DownloadFailure::Validation(format!("write task panicked: {e}")))?
                    .map_err(|e| DownloadFailure::Network(format!("writing cache file: {e}")))
            }
            StorageMode::Blob => Ok(storage::prepare_blob(bytes)),
        }
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
