//! Local saves directory enumeration

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SyncResult;
use crate::naming::LogicalName;
use crate::sidecar::SIDECAR_FILE;

/// Files and directories that belong to the backup machinery rather than the world
pub const METADATA_ENTRIES: &[&str] = &[
    ".git",
    ".gitignore",
    ".gitattributes",
    ".github",
    SIDECAR_FILE,
];

/// Whether a directory already holds a git working copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingCopyState {
    Absent,
    Present,
}

/// Reads the saves root
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    root: PathBuf,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn world_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Exact names of the direct subdirectories of the saves root
    pub async fn list_local_directories(&self) -> SyncResult<BTreeSet<LogicalName>> {
        if !tokio::fs::try_exists(&self.root).await? {
            debug!("Creating saves directory {}", self.root.display());
            tokio::fs::create_dir_all(&self.root).await?;
        }

        let mut names = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            // Non UTF-8 names cannot round-trip through the bindings file
            if let Ok(name) = entry.file_name().into_string() {
                names.insert(name);
            }
        }

        debug!("Found {} local worlds in {}", names.len(), self.root.display());
        Ok(names)
    }

    pub fn working_copy_state(&self, name: &str) -> WorkingCopyState {
        working_copy_state_at(&self.world_dir(name))
    }
}

/// `Present` when `dir/.git/config` exists
pub fn working_copy_state_at(dir: &Path) -> WorkingCopyState {
    if dir.join(".git").join("config").is_file() {
        WorkingCopyState::Present
    } else {
        WorkingCopyState::Absent
    }
}

/// True when the directory holds anything besides backup metadata
pub fn has_real_content(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };

    entries.flatten().any(|entry| {
        let name = entry.file_name();
        !METADATA_ENTRIES
            .iter()
            .any(|meta| name.to_str() == Some(*meta))
    })
}

/// True when the directory exists and has at least one entry
pub fn is_non_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[tokio::test]
    async fn test_lists_direct_subdirectories_exact_case() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("World").create_dir_all().unwrap();
        temp.child("world").create_dir_all().unwrap();
        temp.child("World/region").create_dir_all().unwrap();
        temp.child("notes.txt").touch().unwrap();

        let scanner = DirectoryScanner::new(temp.path());
        let names = scanner.list_local_directories().await.unwrap();

        assert!(names.contains("World"));
        // Case-insensitive filesystems collapse the pair
        if names.len() == 2 {
            assert!(names.contains("world"));
        }
        assert!(!names.contains("region"));
        assert!(!names.contains("notes.txt"));
    }

    #[tokio::test]
    async fn test_creates_missing_root() {
        let temp = assert_fs::TempDir::new().unwrap();
        let root = temp.child("saves");

        let scanner = DirectoryScanner::new(root.path());
        let names = scanner.list_local_directories().await.unwrap();

        assert!(names.is_empty());
        root.assert(predicates::path::is_dir());
    }

    #[test]
    fn test_working_copy_requires_config() {
        let temp = assert_fs::TempDir::new().unwrap();
        let scanner = DirectoryScanner::new(temp.path());

        temp.child("A/.git").create_dir_all().unwrap();
        assert_eq!(scanner.working_copy_state("A"), WorkingCopyState::Absent);

        temp.child("A/.git/config").touch().unwrap();
        assert_eq!(scanner.working_copy_state("A"), WorkingCopyState::Present);

        assert_eq!(scanner.working_copy_state("Missing"), WorkingCopyState::Absent);
    }

    #[test]
    fn test_metadata_is_not_content() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".git/config").touch().unwrap();
        temp.child(".gitignore").write_str("session.lock\n").unwrap();
        temp.child(SIDECAR_FILE).write_str("{}").unwrap();

        assert!(!has_real_content(temp.path()));

        temp.child("level.dat").write_binary(&[1, 2, 3]).unwrap();
        assert!(has_real_content(temp.path()));
    }

    #[test]
    fn test_missing_dir_has_no_content() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert!(!has_real_content(&temp.path().join("nope")));
        assert!(!is_non_empty_dir(&temp.path().join("nope")));
    }
}
