//! Small filesystem helpers shared by the cache engine and the token cache.

use std::fs;
use std::path::Path;

/// Rename `from` to `to`. Falls back to copy+remove when the plain rename
/// fails (typically `EXDEV`, crossing a filesystem boundary) so callers get
/// an atomic-looking move either way.
pub fn rename_atomic(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::warn!("rename failed ({e}), falling back to copy+remove: {from:?} -> {to:?}");

            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

/// Remove a file, tolerating "already gone".
pub fn remove_file_tolerant(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_atomic_moves_file_within_same_dir() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.tmp");
        let to = dir.path().join("a.jpg");
        fs::write(&from, b"hello").unwrap();

        rename_atomic(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"hello");
    }

    #[test]
    fn remove_file_tolerant_ignores_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jpg");
        remove_file_tolerant(&path).unwrap();
    }
}
