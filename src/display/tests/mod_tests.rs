use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::super::*;
use crate::config::{Config, FolderSpecConfig, ProviderConfig, ProviderKind};
use crate::frontend::frame_channel;
use crate::store::models::PhotoUpsert;
use crate::store::photo_repo;

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn test_config() -> Arc<Config> {
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
        max_cache_size_mb: 200,
        prefetch_batch_size: 5,
        show_width: 1920,
        show_height: 1080,
        jpeg_quality: 90,
        use_blob_storage: false,
        cache_path: "cache".into(),
        store_path: "store.db".into(),
        log_level: "info".to_string(),
    })
}

async fn insert_cached_blob(pool: &SqlitePool, id: &str, scan_time: i64) {
    photo_repo::upsert(
        pool,
        &PhotoUpsert {
            photo_id: id.to_string(),
            provider_id: "stub".to_string(),
            parent_folder_id: "root".to_string(),
            filename: format!("{id}.jpg"),
            created_at: None,
            width: Some(100),
            height: Some(100),
            scan_time,
        },
    )
    .await
    .unwrap();
    photo_repo::update_cache_blob(pool, id, b"jpeg-bytes", "image/jpeg", scan_time).await.unwrap();
}

#[tokio::test]
async fn no_candidate_returns_none_without_emitting() {
    let pool = test_pool().await;
    let (tx, mut rx) = frame_channel(4);
    let scheduler = DisplayScheduler::new(pool, test_config(), tx);

    let result = scheduler.run_tick().await.unwrap();
    assert!(result.is_none());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn emits_blob_mode_frame_and_updates_last_viewed() {
    let pool = test_pool().await;
    insert_cached_blob(&pool, "p1", 1).await;
    let (tx, mut rx) = frame_channel(4);
    let scheduler = DisplayScheduler::new(pool.clone(), test_config(), tx);

    let frame = scheduler.run_tick().await.unwrap().unwrap();
    assert_eq!(frame.photo_id, "p1");
    assert_eq!(frame.bytes, b"jpeg-bytes");

    let received = rx.recv().await.unwrap();
    assert_eq!(received.photo_id, "p1");

    let row = photo_repo::select_display_candidate(&pool).await.unwrap().unwrap();
    assert!(row.last_viewed_at.is_some());
}

#[tokio::test]
async fn cycle_property_no_repeats_until_all_shown() {
    let pool = test_pool().await;
    insert_cached_blob(&pool, "a", 1).await;
    insert_cached_blob(&pool, "b", 2).await;
    insert_cached_blob(&pool, "c", 3).await;
    let (tx, _rx) = frame_channel(8);
    let scheduler = DisplayScheduler::new(pool.clone(), test_config(), tx);

    let mut shown = Vec::new();
    for _ in 0..3 {
        let frame = scheduler.run_tick().await.unwrap().unwrap();
        shown.push(frame.photo_id);
    }

    shown.sort();
    assert_eq!(shown, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn missing_cache_file_clears_row_and_emits_nothing() {
    let pool = test_pool().await;
    photo_repo::upsert(
        &pool,
        &PhotoUpsert {
            photo_id: "p1".to_string(),
            provider_id: "stub".to_string(),
            parent_folder_id: "root".to_string(),
            filename: "p1.jpg".to_string(),
            created_at: None,
            width: None,
            height: None,
            scan_time: 1,
        },
    )
    .await
    .unwrap();
    photo_repo::update_cache_file(&pool, "p1", "/does/not/exist.jpg", 10, 1).await.unwrap();

    let (tx, mut rx) = frame_channel(4);
    let scheduler = DisplayScheduler::new(pool.clone(), test_config(), tx);

    let result = scheduler.run_tick().await.unwrap();
    assert!(result.is_none());
    assert!(rx.try_recv().is_err());
    assert_eq!(photo_repo::sum_cached_bytes(&pool).await.unwrap(), 0);
}
