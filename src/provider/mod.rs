//! The provider capability contract (§4.1).
//!
//! A [`Provider`] is a stateless, polymorphic client over a remote cloud
//! folder store. It shares no state between implementations; there is no
//! inheritance here, just the trait plus two conforming structs.

pub mod drive_folder;
pub mod personal_cloud;
pub mod retry;
pub mod token_cache;
pub mod walk;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel folder id meaning "the provider's configured root".
pub const ROOT_FOLDER: &str = "";

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("provider error: {0}")]
    Provider(String),
}

impl ProviderError {
    /// Transient errors are retried by [`retry::with_backoff`]; everything
    /// else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::RateLimited(_) | ProviderError::Timeout(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoRecord {
    pub id: String,
    pub filename: String,
    pub parent_folder_id: String,
    pub created_at: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PhotoRecord),
    Updated(PhotoRecord),
    Deleted(String),
}

pub struct ChangeSet {
    pub changes: BoxStream<'static, Result<ChangeEvent, ProviderError>>,
    pub next_cursor: String,
}

pub type PhotoStream = BoxStream<'static, Result<PhotoRecord, ProviderError>>;
pub type ByteStream = BoxStream<'static, Result<bytes::Bytes, ProviderError>>;

/// Capability contract any cloud-folder vendor conforms to.
///
/// Implementations own no persistent state of their own (no caches, no
/// cursors) — that's the Metadata Store's job. They *do* own their own
/// retry/backoff and auth-refresh plumbing, via [`retry`] and [`token_cache`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Validate credentials are present and usable. Returns
    /// `ProviderError::Authentication` if not.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// DNS-resolve the provider's canonical host. Never fails; returns
    /// `false` on any resolution error.
    async fn is_reachable(&self) -> bool;

    /// Recursively list a folder. `max_depth` of `-1` means unbounded, `0`
    /// means the folder itself with no descent.
    async fn scan_folder(&self, folder_id: &str, max_depth: i32) -> Result<PhotoStream, ProviderError>;

    /// Open a content stream for `photo_id`, bounded by `timeout`.
    async fn download_content(
        &self,
        photo_id: &str,
        timeout: std::time::Duration,
    ) -> Result<ByteStream, ProviderError>;

    /// Fetch everything that changed since `cursor`.
    async fn changes_since(&self, cursor: &str) -> Result<ChangeSet, ProviderError>;

    /// A cursor representing "nothing seen yet", used to bootstrap
    /// incremental scanning after a full scan.
    async fn initial_cursor(&self) -> Result<String, ProviderError>;

    /// The parent of `folder_id`, or `None` if it's the provider's root.
    /// Used by incremental-scan's ancestor-check to decide whether a
    /// changed photo's folder descends from one of the configured roots.
    async fn parent_of(&self, folder_id: &str) -> Result<Option<String>, ProviderError>;

    /// Stable provider identifier, used as the `provider_id` column value
    /// and as the key for cursor/token storage.
    fn provider_name(&self) -> &str;
}
