//! OAuth-style token cache: `get()` returns a valid access token, refreshing
//! first if the current one is within 5 minutes of expiry; `refresh()`
//! persists the new triple atomically (temp file + rename) so a crash never
//! leaves a half-written token file on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::ProviderError;

const REFRESH_SKEW_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix epoch seconds.
    pub expiry: i64,
}

/// A pluggable refresh strategy: given the current refresh token, return a
/// fresh `TokenRecord`. Kept separate from the cache so providers can supply
/// their own HTTP call without the cache needing to know about it.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord, ProviderError>;
}

pub struct TokenCache {
    path: PathBuf,
    refresher: Arc<dyn TokenRefresher>,
    current: RwLock<TokenRecord>,
}

impl TokenCache {
    pub fn new(path: PathBuf, initial: TokenRecord, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            path,
            refresher,
            current: RwLock::new(initial),
        }
    }

    /// Load the initial token record from `path` (written by the offline
    /// OAuth bootstrap script — out of scope here, just consumed).
    pub fn load_from_disk(path: &Path) -> Result<TokenRecord, ProviderError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Authentication(format!("reading token file: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| ProviderError::Authentication(format!("parsing token file: {e}")))
    }

    /// Return a currently-valid access token, refreshing first if needed.
    pub async fn get(&self) -> Result<String, ProviderError> {
        {
            let guard = self.current.read().await;
            if !Self::expires_soon(&guard) {
                return Ok(guard.access_token.clone());
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String, ProviderError> {
        let refresh_token = self.current.read().await.refresh_token.clone();
        let fresh = self.refresher.refresh(&refresh_token).await?;
        self.persist(&fresh)?;
        let token = fresh.access_token.clone();
        *self.current.write().await = fresh;
        Ok(token)
    }

    fn expires_soon(record: &TokenRecord) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        record.expiry - now <= REFRESH_SKEW_SECS
    }

    /// Write the new token triple to a temp sibling, then rename over the
    /// real path — the same atomic-write shape the teacher uses for
    /// cross-device file moves (plain rename, no partial-write window).
    fn persist(&self, record: &TokenRecord) -> Result<(), ProviderError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| ProviderError::Provider(format!("serializing token record: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| ProviderError::Provider(format!("writing token temp file: {e}")))?;
        crate::fs_utils::rename_atomic(&tmp_path, &self.path)
            .map_err(|e| ProviderError::Provider(format!("renaming token file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedRefresher {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenRecord, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenRecord {
                access_token: "new-access".into(),
                refresh_token: "new-refresh".into(),
                expiry: i64::MAX / 2,
            })
        }
    }

    #[tokio::test]
    async fn returns_cached_token_when_not_expiring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicU32::new(0),
        });
        let cache = TokenCache::new(
            path,
            TokenRecord {
                access_token: "valid".into(),
                refresh_token: "r".into(),
                expiry: i64::MAX / 2,
            },
            refresher.clone(),
        );

        let token = cache.get().await.unwrap();
        assert_eq!(token, "valid");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refreshes_and_persists_when_close_to_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let refresher = Arc::new(FixedRefresher {
            calls: AtomicU32::new(0),
        });
        let cache = TokenCache::new(
            path.clone(),
            TokenRecord {
                access_token: "stale".into(),
                refresh_token: "r".into(),
                expiry: 0,
            },
            refresher.clone(),
        );

        let token = cache.get().await.unwrap();
        assert_eq!(token, "new-access");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        let on_disk: TokenRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.access_token, "new-access");
    }
}
