//! Town root discovery.

use std::path::{Path, PathBuf};

use anyhow::Result;

/// File that marks a directory as a town root.
pub const TOWN_MARKER: &str = "mayor/town.json";

/// Nearest ancestor of `start` (inclusive) containing the town marker.
pub fn find_town_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(TOWN_MARKER).is_file())
        .map(Path::to_path_buf)
}

/// The explicit root if given, otherwise the town enclosing the cwd.
pub fn resolve_town_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        if !root.is_dir() {
            anyhow::bail!("Town root {} is not a directory", root.display());
        }
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    find_town_root(&cwd).ok_or_else(|| {
        anyhow::anyhow!(
            "Not in a Gas Town workspace: no {} above {}",
            TOWN_MARKER,
            cwd.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_root_from_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("mayor")).unwrap();
        std::fs::write(dir.path().join(TOWN_MARKER), "{}").unwrap();
        let nested = dir.path().join("gastown/crew/max");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_town_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn no_marker_means_no_town() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_town_root(dir.path()).is_none());
    }

    #[test]
    fn explicit_root_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_town_root(Some(&dir.path().join("missing"))).is_err());
        assert_eq!(resolve_town_root(Some(dir.path())).unwrap(), dir.path());
    }
}
