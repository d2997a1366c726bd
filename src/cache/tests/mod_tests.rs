use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use image::{ImageBuffer, Rgba};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::super::*;
use crate::config::{Config, FolderSpecConfig, ProviderConfig, ProviderKind};
use crate::provider::{ByteStream, ChangeSet, PhotoRecord, PhotoStream, Provider, ProviderError};
use crate::store::models::PhotoUpsert;
use crate::store::photo_repo;

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn test_config(cache_dir: std::path::PathBuf) -> Arc<Config> {
    Arc::new(Config {
        provider: ProviderKind::DriveFolder,
        provider_config: ProviderConfig {
            credentials_path: "creds.json".into(),
            token_path: "token.json".into(),
            folders: vec![FolderSpecConfig { id: None, depth: -1 }],
            base_url: None,
        },
        update_interval_ms: 60_000,
        scan_interval_ms: 6 * 60 * 60 * 1000,
        cache_tick_interval_ms: 30_000,
        max_cache_size_mb: 1,
        prefetch_batch_size: 3,
        show_width: 200,
        show_height: 150,
        jpeg_quality: 90,
        use_blob_storage: false,
        cache_path: cache_dir,
        store_path: "store.db".into(),
        log_level: "info".to_string(),
    })
}

fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
    let buf: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_fn(width, height, |x, y| Rgba([(x % 255) as u8, (y % 255) as u8, 10, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(buf)
        .to_rgb8()
        .write_with_encoder(image::codecs::jpeg::JpegEncoder::new(&mut out))
        .unwrap();
    out
}

enum StubBehavior {
    Bytes(Vec<u8>),
    NetworkError,
}

struct StubProvider {
    behavior: StubBehavior,
}

#[async_trait]
impl Provider for StubProvider {
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        true
    }

    async fn scan_folder(&self, _folder_id: &str, _max_depth: i32) -> Result<PhotoStream, ProviderError> {
        let empty: BoxStream<'static, Result<PhotoRecord, ProviderError>> =
            Box::pin(futures_util::stream::empty());
        Ok(empty)
    }

    async fn download_content(&self, _photo_id: &str, _timeout: Duration) -> Result<ByteStream, ProviderError> {
        match &self.behavior {
            StubBehavior::Bytes(bytes) => {
                let chunk: Result<Bytes, ProviderError> = Ok(Bytes::from(bytes.clone()));
                Ok(Box::pin(futures_util::stream::iter(vec![chunk])))
            }
            StubBehavior::NetworkError => Err(ProviderError::Network("stub down".to_string())),
        }
    }

    async fn changes_since(&self, _cursor: &str) -> Result<ChangeSet, ProviderError> {
        Ok(ChangeSet {
            changes: Box::pin(futures_util::stream::empty()),
            next_cursor: String::new(),
        })
    }

    async fn initial_cursor(&self) -> Result<String, ProviderError> {
        Ok(String::new())
    }

    async fn parent_of(&self, _folder_id: &str) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    fn provider_name(&self) -> &str {
        "stub"
    }
}

async fn insert_uncached(pool: &SqlitePool, photo_id: &str, scan_time: i64) {
    photo_repo::upsert(
        pool,
        &PhotoUpsert {
            photo_id: photo_id.to_string(),
            provider_id: "stub".to_string(),
            parent_folder_id: "root".to_string(),
            filename: format!("{photo_id}.jpg"),
            created_at: None,
            width: Some(400),
            height: Some(300),
            scan_time,
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn single_flight_drops_concurrent_tick() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn Provider> = Arc::new(StubProvider { behavior: StubBehavior::NetworkError });
    let engine = CacheEngine::new(pool, provider, test_config(dir.path().to_path_buf()));

    let held = engine.single_flight.try_lock().unwrap();
    let outcome = engine.run_tick().await;
    assert_eq!(outcome, TickOutcome::SingleFlightDropped);
    drop(held);
}

#[tokio::test]
async fn successful_download_updates_row_and_clears_failure_streak() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    insert_uncached(&pool, "p1", 1).await;

    let bytes = encode_jpeg(400, 300);
    let provider: Arc<dyn Provider> = Arc::new(StubProvider { behavior: StubBehavior::Bytes(bytes) });
    let engine = CacheEngine::new(pool.clone(), provider, test_config(dir.path().to_path_buf()));

    let outcome = engine.run_tick().await;
    match outcome {
        TickOutcome::Completed { downloads, .. } => {
            assert_eq!(downloads, vec![DownloadOutcome::Success("p1".to_string())]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert!(photo_repo::sum_cached_bytes(&pool).await.unwrap() > 0);
    let on_disk = storage::list_cache_files(dir.path()).unwrap();
    assert_eq!(on_disk.len(), 1);
}

#[tokio::test]
async fn validation_failure_tombstones_photo() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    insert_uncached(&pool, "tiny", 1).await;

    // Below the 100px minimum dimension: normalize() rejects it outright.
    let bytes = encode_jpeg(40, 40);
    let provider: Arc<dyn Provider> = Arc::new(StubProvider { behavior: StubBehavior::Bytes(bytes) });
    let engine = CacheEngine::new(pool.clone(), provider, test_config(dir.path().to_path_buf()));

    let outcome = engine.run_tick().await;
    match outcome {
        TickOutcome::Completed { downloads, .. } => {
            assert_eq!(downloads, vec![DownloadOutcome::ValidationFail("tiny".to_string())]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let candidates = photo_repo::select_prefetch_candidates(&pool, 10).await.unwrap();
    assert!(candidates.is_empty(), "tombstoned row must not be retried");
}

#[tokio::test]
async fn three_failed_ticks_enter_cooling() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn Provider> = Arc::new(StubProvider { behavior: StubBehavior::NetworkError });
    let engine = CacheEngine::new(pool.clone(), provider, test_config(dir.path().to_path_buf()));

    for n in 1..=3 {
        insert_uncached(&pool, &format!("p{n}"), n as i64).await;
        let outcome = engine.run_tick().await;
        assert!(matches!(outcome, TickOutcome::Completed { .. }), "tick {n} should still run downloads");
    }

    insert_uncached(&pool, "p4", 4).await;
    let outcome = engine.run_tick().await;
    assert_eq!(outcome, TickOutcome::Cooling);
}

#[tokio::test]
async fn eviction_releases_file_and_clears_row_when_over_cap() {
    let pool = test_pool().await;
    let dir = tempfile::tempdir().unwrap();
    insert_uncached(&pool, "p1", 1).await;

    let path = dir.path().join("p1.jpg");
    std::fs::write(&path, vec![0u8; 2 * 1024 * 1024]).unwrap();
    photo_repo::update_cache_file(&pool, "p1", path.to_str().unwrap(), 2 * 1024 * 1024, 1)
        .await
        .unwrap();

    let provider: Arc<dyn Provider> = Arc::new(StubProvider { behavior: StubBehavior::NetworkError });
    let engine = CacheEngine::new(pool.clone(), provider, test_config(dir.path().to_path_buf()));

    engine.evict_if_needed().await.unwrap();

    assert_eq!(photo_repo::sum_cached_bytes(&pool).await.unwrap(), 0);
    assert!(!path.exists());
}
