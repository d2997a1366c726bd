//! Configured scan roots, and the ancestor-check incremental scanning uses
//! to decide whether a changed photo belongs to one of them.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::FolderSpecConfig;
use crate::provider::{Provider, ProviderError, ROOT_FOLDER};

const MAX_ANCESTOR_DEPTH: u32 = 20;

#[derive(Debug, Clone)]
pub struct FolderSpec {
    /// `None` means the provider's root folder.
    pub folder_id: Option<String>,
    /// -1 = unbounded, 0 = folder itself only, N>0 = descend N levels.
    pub depth: i32,
}

impl FolderSpec {
    pub fn root_id(&self) -> &str {
        self.folder_id.as_deref().unwrap_or(ROOT_FOLDER)
    }
}

impl From<&FolderSpecConfig> for FolderSpec {
    fn from(cfg: &FolderSpecConfig) -> Self {
        FolderSpec { folder_id: cfg.id.clone(), depth: cfg.depth }
    }
}

/// Walk `parent_folder_id`'s ancestor chain, up to `MAX_ANCESTOR_DEPTH`
/// hops and guarded against cycles, to see whether it descends from any of
/// `specs`. A photo directly inside a configured root counts as under it.
pub async fn is_under_any_spec(
    provider: &Arc<dyn Provider>,
    parent_folder_id: &str,
    specs: &[FolderSpec],
) -> Result<bool, ProviderError> {
    let roots: HashSet<&str> = specs.iter().map(|s| s.root_id()).collect();
    if roots.contains(ROOT_FOLDER) {
        // One of the configured specs is the provider root: everything is
        // under it by definition, no need to walk.
        return Ok(true);
    }

    let mut current = parent_folder_id.to_string();
    let mut visited: HashSet<String> = HashSet::new();

    for _ in 0..MAX_ANCESTOR_DEPTH {
        if roots.contains(current.as_str()) {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            return Ok(false); // cycle, never reached a configured root
        }
        match provider.parent_of(&current).await? {
            Some(parent) => current = parent,
            None => return Ok(false), // reached the provider root without a match
        }
    }
    Ok(false)
}

#[cfg(test)]
#[path = "tests/folder_spec_tests.rs"]
mod tests;
