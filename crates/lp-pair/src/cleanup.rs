use std::io;
use std::path::Path;

/// Remove a partially produced file.
///
/// Returns the removal error, if any; a file that is already gone counts as
/// removed.
pub(crate) fn remove_quietly(path: &Path) -> Option<io::Error> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed {}", path.display());
            None
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
            Some(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_existing_and_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.jpeg");
        std::fs::write(&path, b"x").unwrap();
        assert!(remove_quietly(&path).is_none());
        assert!(!path.exists());
        assert!(remove_quietly(&path).is_none());
    }

    #[test]
    fn reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be removed with remove_file.
        assert!(remove_quietly(dir.path()).is_some());
    }
}
