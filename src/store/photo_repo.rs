//! Queries over the `photo` table: the five shapes listed in the design
//! doc's §4.2 (display candidate, prefetch candidates, eviction candidates,
//! cached-bytes sum, upsert) plus tombstoning and cache-field mutation.

use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::models::{PhotoRow, PhotoUpsert};

const PHOTO_COLUMNS: &str = "photo_id, provider_id, parent_folder_id, filename, created_at, \
     width, height, first_seen_at, last_seen_in_scan_at, tombstoned, last_viewed_at, \
     cached_path, cached_data, cached_mime, cached_size_bytes, cached_at";

/// Insert-or-update a single photo record from a scan. `tombstoned` is
/// cleared (a photo reappearing un-deletes it) and `last_seen_in_scan_at` is
/// refreshed; cache fields are left untouched if the row already exists.
pub async fn upsert(pool: &SqlitePool, record: &PhotoUpsert) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO photo (photo_id, provider_id, parent_folder_id, filename, created_at, \
         width, height, first_seen_at, last_seen_in_scan_at, tombstoned)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
         ON CONFLICT(photo_id) DO UPDATE SET
            parent_folder_id = excluded.parent_folder_id,
            filename = excluded.filename,
            created_at = excluded.created_at,
            width = excluded.width,
            height = excluded.height,
            last_seen_in_scan_at = excluded.last_seen_in_scan_at,
            tombstoned = 0",
    )
    .bind(&record.photo_id)
    .bind(&record.provider_id)
    .bind(&record.parent_folder_id)
    .bind(&record.filename)
    .bind(record.created_at)
    .bind(record.width)
    .bind(record.height)
    .bind(record.scan_time)
    .bind(record.scan_time)
    .execute(pool)
    .await?;
    Ok(())
}

/// Batch-upsert within a single transaction, grouping a whole scan page.
pub async fn batch_upsert(pool: &SqlitePool, records: &[PhotoUpsert]) -> Result<(), sqlx::Error> {
    let mut tx: Transaction<'_, Sqlite> = pool.begin().await?;
    for record in records {
        sqlx::query(
            "INSERT INTO photo (photo_id, provider_id, parent_folder_id, filename, created_at, \
             width, height, first_seen_at, last_seen_in_scan_at, tombstoned)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(photo_id) DO UPDATE SET
                parent_folder_id = excluded.parent_folder_id,
                filename = excluded.filename,
                created_at = excluded.created_at,
                width = excluded.width,
                height = excluded.height,
                last_seen_in_scan_at = excluded.last_seen_in_scan_at,
                tombstoned = 0",
        )
        .bind(&record.photo_id)
        .bind(&record.provider_id)
        .bind(&record.parent_folder_id)
        .bind(&record.filename)
        .bind(record.created_at)
        .bind(record.width)
        .bind(record.height)
        .bind(record.scan_time)
        .bind(record.scan_time)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Mark every row of `provider_id` whose `last_seen_in_scan_at` predates
/// `scan_start_time` as tombstoned — the full-scan "it's gone" inference.
pub async fn tombstone_stale(
    pool: &SqlitePool,
    provider_id: &str,
    scan_start_time: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE photo SET tombstoned = 1
         WHERE provider_id = ? AND last_seen_in_scan_at < ? AND tombstoned = 0",
    )
    .bind(provider_id)
    .bind(scan_start_time)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Tombstone a single photo (incremental-scan deletion, or validation
/// failure in the cache engine).
pub async fn tombstone(pool: &SqlitePool, photo_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE photo SET tombstoned = 1 WHERE photo_id = ?")
        .bind(photo_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// First non-tombstoned cached row, oldest-shown-first with a random
/// tie-break among rows sharing the same `last_viewed_at` (notably among the
/// NULL/unseen group).
pub async fn select_display_candidate(pool: &SqlitePool) -> Result<Option<PhotoRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {PHOTO_COLUMNS} FROM photo
         WHERE tombstoned = 0 AND cached_size_bytes IS NOT NULL
         ORDER BY (last_viewed_at IS NOT NULL), last_viewed_at ASC, RANDOM()
         LIMIT 1"
    );
    sqlx::query_as::<_, PhotoRow>(&sql).fetch_optional(pool).await
}

/// Up to `limit` uncached, non-tombstoned rows, oldest-unseen-first.
pub async fn select_prefetch_candidates(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<PhotoRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {PHOTO_COLUMNS} FROM photo
         WHERE tombstoned = 0 AND cached_size_bytes IS NULL
         ORDER BY first_seen_at ASC
         LIMIT ?"
    );
    sqlx::query_as::<_, PhotoRow>(&sql).bind(limit).fetch_all(pool).await
}

/// Up to `limit` cached rows ordered oldest-shown-first, used to pick
/// eviction targets regardless of tombstone state (a tombstoned photo's
/// cache resource must still be released).
pub async fn select_eviction_candidates(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<PhotoRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {PHOTO_COLUMNS} FROM photo
         WHERE cached_size_bytes IS NOT NULL
         ORDER BY (last_viewed_at IS NOT NULL), last_viewed_at ASC
         LIMIT ?"
    );
    sqlx::query_as::<_, PhotoRow>(&sql).bind(limit).fetch_all(pool).await
}

/// Rows whose cache resource must be released even though they're
/// tombstoned — used by the cache engine's eviction pass to honor "a
/// tombstoned photo's cache resource must be released within one eviction
/// pass" regardless of the byte cap.
pub async fn select_tombstoned_cached(pool: &SqlitePool) -> Result<Vec<PhotoRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {PHOTO_COLUMNS} FROM photo WHERE tombstoned = 1 AND cached_size_bytes IS NOT NULL"
    );
    sqlx::query_as::<_, PhotoRow>(&sql).fetch_all(pool).await
}

pub async fn sum_cached_bytes(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COALESCE(SUM(cached_size_bytes), 0) AS total FROM photo")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get::<i64, _>("total")?)
}

pub async fn update_cache_file(
    pool: &SqlitePool,
    photo_id: &str,
    path: &str,
    size_bytes: i64,
    cached_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE photo SET cached_path = ?, cached_data = NULL, cached_mime = NULL, \
         cached_size_bytes = ?, cached_at = ? WHERE photo_id = ?",
    )
    .bind(path)
    .bind(size_bytes)
    .bind(cached_at)
    .bind(photo_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_cache_blob(
    pool: &SqlitePool,
    photo_id: &str,
    data: &[u8],
    mime: &str,
    cached_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE photo SET cached_path = NULL, cached_data = ?, cached_mime = ?, \
         cached_size_bytes = ?, cached_at = ? WHERE photo_id = ?",
    )
    .bind(data)
    .bind(mime)
    .bind(data.len() as i64)
    .bind(cached_at)
    .bind(photo_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Null out all cache columns atomically (eviction, or a file-mode row whose
/// backing file went missing).
pub async fn clear_cache_fields(pool: &SqlitePool, photo_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE photo SET cached_path = NULL, cached_data = NULL, cached_mime = NULL, \
         cached_size_bytes = NULL, cached_at = NULL WHERE photo_id = ?",
    )
    .bind(photo_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_last_viewed(pool: &SqlitePool, photo_id: &str, now: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE photo SET last_viewed_at = ? WHERE photo_id = ?")
        .bind(now)
        .bind(photo_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Zero every `last_viewed_at` among non-tombstoned cached rows — the
/// display scheduler's reshuffle.
pub async fn reshuffle_last_viewed(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE photo SET last_viewed_at = NULL WHERE tombstoned = 0 AND cached_size_bytes IS NOT NULL",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Count of non-tombstoned cached rows whose `last_viewed_at` is older than
/// `cutoff` (or NULL, i.e. never shown) — used to decide whether a
/// reshuffle is due yet.
pub async fn count_stale_or_unseen(pool: &SqlitePool, cutoff: i64) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM photo
         WHERE tombstoned = 0 AND cached_size_bytes IS NOT NULL
           AND (last_viewed_at IS NULL OR last_viewed_at < ?)",
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get::<i64, _>("n")?)
}

#[cfg(test)]
#[path = "tests/photo_repo_tests.rs"]
mod tests;
