//! Atomic state-file commit helpers.
//!
//! Persisted engine state is always written under a `.resync`-suffixed
//! staging name and renamed over the primary file afterwards. A crash
//! leaves the old primary intact plus a staging leftover; what a leftover
//! means (harmless vs fatal) is decided by the owner of the file pair.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Suffix appended to a file name while its replacement is being staged.
pub const STAGING_SUFFIX: &str = ".resync";

/// The staging path belonging to `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Write `contents` to the staging path of `path` without touching the
/// primary file. Returns the staging path.
pub fn stage(path: &Path, contents: &[u8]) -> Result<PathBuf, CoreError> {
    let staged = staging_path(path);
    fs::write(&staged, contents).map_err(|e| CoreError::io(&staged, e))?;
    Ok(staged)
}

/// Rename a previously staged file over its primary.
pub fn commit(path: &Path) -> Result<(), CoreError> {
    let staged = staging_path(path);
    fs::rename(&staged, path).map_err(|e| CoreError::io(&staged, e))
}

/// Stage and immediately commit: the single-file atomic write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    stage(path, contents)?;
    commit(path)
}

/// True if a staging leftover exists for `path`.
pub fn has_staged(path: &Path) -> bool {
    staging_path(path).exists()
}

/// Remove a staging leftover if present.
pub fn discard_staged(path: &Path) -> Result<(), CoreError> {
    let staged = staging_path(path);
    match fs::remove_file(&staged) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::io(&staged, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_appends_suffix() {
        let path = Path::new("/work/data.map");
        assert_eq!(staging_path(path), PathBuf::from("/work/data.map.resync"));
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");
        fs::write(&path, b"old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!has_staged(&path));
    }

    #[test]
    fn stage_leaves_primary_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");
        fs::write(&path, b"old").unwrap();

        stage(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"old");
        assert!(has_staged(&path));
    }

    #[test]
    fn commit_promotes_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");
        fs::write(&path, b"old").unwrap();
        stage(&path, b"new").unwrap();

        commit(&path).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!has_staged(&path));
    }

    #[test]
    fn discard_staged_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");
        stage(&path, b"x").unwrap();

        discard_staged(&path).unwrap();
        discard_staged(&path).unwrap();

        assert!(!has_staged(&path));
    }
}
