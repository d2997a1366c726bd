//! `personal-cloud-B` provider: a self-hosted/personal cloud drive reachable
//! over a static API key (no OAuth refresh dance — "where applicable" in the
//! capability contract does not apply here).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::walk::{scan_folder_tree, FolderEntry, FolderPage, FolderPager};
use super::{ByteStream, ChangeEvent, ChangeSet, PhotoRecord, PhotoStream, Provider, ProviderError};
use crate::provider::retry::with_backoff;

const DEFAULT_BASE_URL: &str = "https://my-personal-cloud.test/api/v1";

#[derive(Debug, Deserialize)]
struct Credentials {
    api_key: String,
}

pub struct PersonalCloudProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PersonalCloudProvider {
    pub fn new(credentials_path: PathBuf, base_url: Option<String>) -> Result<Self, ProviderError> {
        let contents = std::fs::read_to_string(&credentials_path)
            .map_err(|e| ProviderError::Authentication(format!("reading credentials: {e}")))?;
        let creds: Credentials = serde_json::from_str(&contents)
            .map_err(|e| ProviderError::Authentication(format!("parsing credentials: {e}")))?;

        if creds.api_key.trim().is_empty() {
            return Err(ProviderError::Authentication("empty api_key".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: creds.api_key,
        })
    }
}

#[derive(Deserialize, Serialize)]
struct RemoteItem {
    id: String,
    name: String,
    is_dir: bool,
    parent_id: String,
    taken_at_ms: Option<i64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ListResponse {
    items: Vec<RemoteItem>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct DeltaResponse {
    upserts: Vec<RemoteItem>,
    deletes: Vec<String>,
    cursor: String,
}

#[derive(Deserialize)]
struct ItemMetaResponse {
    parent_id: Option<String>,
}

fn classify_status(status: reqwest::StatusCode) -> ProviderError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        ProviderError::Authentication(format!("http {status}"))
    } else if status == reqwest::StatusCode::NOT_FOUND {
        ProviderError::NotFound(format!("http {status}"))
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(format!("http {status}"))
    } else if status.is_server_error() {
        ProviderError::Network(format!("http {status}"))
    } else {
        ProviderError::Provider(format!("http {status}"))
    }
}

fn to_photo(item: RemoteItem) -> PhotoRecord {
    PhotoRecord {
        id: item.id,
        filename: item.name,
        parent_folder_id: item.parent_id,
        created_at: item.taken_at_ms,
        width: item.width,
        height: item.height,
    }
}

#[async_trait]
impl FolderPager for PersonalCloudProvider {
    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FolderPage, ProviderError> {
        with_backoff(|| async {
            let mut req = self
                .client
                .get(format!("{}/list", self.base_url))
                .header("X-Api-Key", &self.api_key)
                .query(&[("dir", folder_id)]);
            if let Some(token) = page_token {
                req = req.query(&[("cursor", token)]);
            }

            let resp = req.send().await.map_err(|e| ProviderError::Network(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }

            let body: ListResponse =
                resp.json().await.map_err(|e| ProviderError::Provider(e.to_string()))?;

            let entries = body
                .items
                .into_iter()
                .map(|item| {
                    if item.is_dir {
                        FolderEntry::Folder(item.id.clone())
                    } else {
                        FolderEntry::Photo(to_photo(item))
                    }
                })
                .collect();

            Ok(FolderPage {
                entries,
                next_page_token: body.cursor,
            })
        })
        .await
    }
}

#[async_trait]
impl Provider for PersonalCloudProvider {
    async fn initialize(&self) -> Result<(), ProviderError> {
        let resp = self
            .client
            .get(format!("{}/whoami", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(resp.status()))
        }
    }

    async fn is_reachable(&self) -> bool {
        let host = reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()));
        match host {
            Some(host) => tokio::net::lookup_host((host.as_str(), 443)).await.is_ok(),
            None => false,
        }
    }

    async fn scan_folder(&self, folder_id: &str, max_depth: i32) -> Result<PhotoStream, ProviderError> {
        let root = if folder_id.is_empty() {
            "/".to_string()
        } else {
            folder_id.to_string()
        };
        let pager: Arc<dyn FolderPager> = Arc::new(PersonalCloudProvider {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
        });
        Ok(scan_folder_tree(pager, root, max_depth))
    }

    async fn download_content(
        &self,
        photo_id: &str,
        timeout: Duration,
    ) -> Result<ByteStream, ProviderError> {
        let resp = tokio::time::timeout(
            timeout,
            self.client
                .get(format!("{}/download", self.base_url))
                .header("X-Api-Key", &self.api_key)
                .query(&[("id", photo_id)])
                .send(),
        )
        .await
        .map_err(|_| ProviderError::Timeout(format!("download {photo_id} timed out")))?
        .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(classify_status(resp.status()));
        }

        let stream = resp
            .bytes_stream()
            .map(|r| r.map_err(|e| ProviderError::Network(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn changes_since(&self, cursor: &str) -> Result<ChangeSet, ProviderError> {
        let body = with_backoff(|| async {
            let resp = self
                .client
                .get(format!("{}/delta", self.base_url))
                .header("X-Api-Key", &self.api_key)
                .query(&[("cursor", cursor)])
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            resp.json::<DeltaResponse>()
                .await
                .map_err(|e| ProviderError::Provider(e.to_string()))
        })
        .await?;

        let mut events: Vec<Result<ChangeEvent, ProviderError>> = body
            .upserts
            .into_iter()
            .map(|item| Ok(ChangeEvent::Updated(to_photo(item))))
            .collect();
        events.extend(body.deletes.into_iter().map(|id| Ok(ChangeEvent::Deleted(id))));

        Ok(ChangeSet {
            changes: Box::pin(futures_util::stream::iter(events)),
            next_cursor: body.cursor,
        })
    }

    async fn initial_cursor(&self) -> Result<String, ProviderError> {
        // A personal-cloud delta endpoint treats the empty string as
        // "everything since the beginning of time".
        Ok(String::new())
    }

    async fn parent_of(&self, folder_id: &str) -> Result<Option<String>, ProviderError> {
        if folder_id.is_empty() || folder_id == "/" {
            return Ok(None);
        }
        with_backoff(|| async {
            let resp = self
                .client
                .get(format!("{}/meta", self.base_url))
                .header("X-Api-Key", &self.api_key)
                .query(&[("id", folder_id)])
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            let body: ItemMetaResponse =
                resp.json().await.map_err(|e| ProviderError::Provider(e.to_string()))?;
            Ok(body.parent_id)
        })
        .await
    }

    fn provider_name(&self) -> &str {
        "personal_cloud"
    }
}
