//! Project-root resolution and id minting (§4.2). Searches upward from
//! the working directory for a `.orc` sentinel so `orc` can be invoked
//! from any subdirectory of an initialized project the way `git`
//! resolves `.git`.

use std::path::{Path, PathBuf};

use crate::config::SENTINEL_DIR;
use crate::store::Store;

/// Walks upward from `start` looking for a `.orc` directory.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.canonicalize().ok()?;
    loop {
        if dir.join(SENTINEL_DIR).is_dir() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(SENTINEL_DIR).is_dir()
}

/// Creates the `.orc/` directory structure (§6 durable layout). A
/// reinitialization over an existing sentinel is a no-op that leaves
/// existing data untouched.
pub fn init_project(project_dir: &Path) -> anyhow::Result<bool> {
    let sentinel = project_dir.join(SENTINEL_DIR);
    let created = !sentinel.exists();
    std::fs::create_dir_all(sentinel.join("worktrees"))?;
    std::fs::create_dir_all(sentinel.join("exports"))?;
    std::fs::create_dir_all(sentinel.join("logs"))?;

    let config_path = sentinel.join("config.yaml");
    if !config_path.exists() {
        crate::config::OrcToml::default().save(&config_path)?;
    }
    Ok(created)
}

/// Mints the next task id, delegating to the Store's monotonic scan
/// (§4.1) rather than duplicating id-generation logic outside it.
pub fn next_task_id(store: &Store) -> anyhow::Result<String> {
    Ok(store.next_task_id()?)
}

pub fn next_initiative_id(store: &Store) -> anyhow::Result<String> {
    Ok(store.next_initiative_id()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_sentinel_from_nested_subdirectory() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(SENTINEL_DIR)).unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_project_root(&nested).unwrap();
        assert_eq!(found, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn returns_none_when_no_sentinel_exists() {
        let dir = tempdir().unwrap();
        assert!(find_project_root(dir.path()).is_none());
    }

    #[test]
    fn init_project_is_idempotent() {
        let dir = tempdir().unwrap();
        assert!(init_project(dir.path()).unwrap());
        assert!(!init_project(dir.path()).unwrap());
        assert!(is_initialized(dir.path()));
    }
}
