//! Shared recursive folder-walk used by both provider implementations.
//!
//! Handles the two provider-required behaviors that don't vary by vendor:
//! circular-folder defense (visited-set, shared across the whole scan) and
//! depth control (emit at every level up to `max_depth`; stop descending
//! exactly at it). Pagination pacing (500ms between pages) also lives here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{PhotoRecord, PhotoStream, ProviderError};

const PAGE_DELAY: Duration = Duration::from_millis(500);

pub enum FolderEntry {
    Photo(PhotoRecord),
    Folder(String),
}

pub struct FolderPage {
    pub entries: Vec<FolderEntry>,
    pub next_page_token: Option<String>,
}

/// Vendor-specific "list one page of a folder" call. Implemented by each
/// provider's HTTP client; everything else about recursion is shared here.
#[async_trait]
pub trait FolderPager: Send + Sync {
    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FolderPage, ProviderError>;
}

/// Recursively walk `root` (the provider's root sentinel or a specific
/// folder id) down to `max_depth` (`-1` = unbounded, `0` = root only),
/// yielding every `PhotoRecord` found lazily.
pub fn scan_folder_tree(pager: Arc<dyn FolderPager>, root: String, max_depth: i32) -> PhotoStream {
    Box::pin(async_stream::try_stream! {
        let mut visited: HashSet<String> = HashSet::new();
        // (folder_id, depth_remaining) where depth_remaining is None for unbounded.
        let mut stack: Vec<(String, Option<i32>)> = vec![(root, if max_depth < 0 { None } else { Some(max_depth) })];

        while let Some((folder_id, depth_remaining)) = stack.pop() {
            if !visited.insert(folder_id.clone()) {
                continue; // circular-folder defense: silently skip re-entry.
            }

            let mut page_token: Option<String> = None;
            let mut first_page = true;

            loop {
                if !first_page {
                    tokio::time::sleep(PAGE_DELAY).await;
                }
                first_page = false;

                let page = pager.list_page(&folder_id, page_token.as_deref()).await?;

                for entry in page.entries {
                    match entry {
                        FolderEntry::Photo(record) => yield record,
                        FolderEntry::Folder(child_id) => {
                            let can_descend = match depth_remaining {
                                None => true,
                                Some(remaining) => remaining > 0,
                            };
                            if can_descend {
                                let child_depth = depth_remaining.map(|r| r - 1);
                                stack.push((child_id, child_depth));
                            }
                        }
                    }
                }

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::Mutex;

    struct StubPager {
        // folder_id -> pages of entries
        pages: Mutex<std::collections::HashMap<String, Vec<Vec<FolderEntry>>>>,
    }

    #[async_trait]
    impl FolderPager for StubPager {
        async fn list_page(
            &self,
            folder_id: &str,
            _page_token: Option<&str>,
        ) -> Result<FolderPage, ProviderError> {
            let mut pages = self.pages.lock().unwrap();
            let remaining = pages.get_mut(folder_id).map(|v| v.remove(0));
            match remaining {
                Some(entries) => Ok(FolderPage {
                    entries,
                    next_page_token: None,
                }),
                None => Ok(FolderPage {
                    entries: vec![],
                    next_page_token: None,
                }),
            }
        }
    }

    fn photo(id: &str) -> PhotoRecord {
        PhotoRecord {
            id: id.to_string(),
            filename: format!("{id}.jpg"),
            parent_folder_id: "root".to_string(),
            created_at: None,
            width: None,
            height: None,
        }
    }

    #[tokio::test]
    async fn depth_zero_does_not_descend() {
        let mut pages = std::collections::HashMap::new();
        pages.insert(
            "root".to_string(),
            vec![vec![FolderEntry::Photo(photo("a")), FolderEntry::Folder("child".to_string())]],
        );
        pages.insert("child".to_string(), vec![vec![FolderEntry::Photo(photo("b"))]]);
        let pager = Arc::new(StubPager { pages: Mutex::new(pages) });

        let stream = scan_folder_tree(pager, "root".to_string(), 0);
        let results: Vec<_> = stream.collect().await;
        let ids: Vec<String> = results.into_iter().map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn unbounded_depth_descends_fully() {
        let mut pages = std::collections::HashMap::new();
        pages.insert(
            "root".to_string(),
            vec![vec![FolderEntry::Photo(photo("a")), FolderEntry::Folder("child".to_string())]],
        );
        pages.insert("child".to_string(), vec![vec![FolderEntry::Photo(photo("b"))]]);
        let pager = Arc::new(StubPager { pages: Mutex::new(pages) });

        let stream = scan_folder_tree(pager, "root".to_string(), -1);
        let mut results: Vec<String> = stream.collect::<Vec<_>>().await.into_iter().map(|r| r.unwrap().id).collect();
        results.sort();
        assert_eq!(results, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn circular_folders_are_visited_once() {
        let mut pages = std::collections::HashMap::new();
        pages.insert(
            "root".to_string(),
            vec![vec![FolderEntry::Folder("child".to_string())]],
        );
        pages.insert(
            "child".to_string(),
            vec![vec![FolderEntry::Photo(photo("b")), FolderEntry::Folder("root".to_string())]],
        );
        let pager = Arc::new(StubPager { pages: Mutex::new(pages) });

        // Should terminate (no infinite loop) and yield "b" exactly once.
        let stream = scan_folder_tree(pager, "root".to_string(), -1);
        let results: Vec<String> = stream.collect::<Vec<_>>().await.into_iter().map(|r| r.unwrap().id).collect();
        assert_eq!(results, vec!["b"]);
    }
}
