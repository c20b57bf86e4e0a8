//! Persisted binding table
//!
//! The binding table maps a world folder name to the GitHub repository it is
//! backed up to. It is stored as JSON next to the YAML config together with the
//! access token and the set of worlds excluded after deletion:
//!
//! ```json
//! {
//!   "accessToken": "ghp_...",
//!   "backedUpWorlds": { "My World": { "repoFullName": "steve/minecraft-world-My-World", "enabled": true } },
//!   "noBackupWorlds": []
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::naming::{LogicalName, RemoteRepoId};

/// Association of one world folder with a remote repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryBinding {
    /// `owner/name`, empty while no repository has been created
    #[serde(default)]
    pub repo_full_name: String,

    /// Whether the world is synced at all
    #[serde(default)]
    pub enabled: bool,
}

impl RepositoryBinding {
    pub fn new(repo_full_name: impl Into<String>, enabled: bool) -> Self {
        Self {
            repo_full_name: repo_full_name.into(),
            enabled,
        }
    }

    /// Parsed repository id, `None` while unbound or malformed
    pub fn repo_id(&self) -> Option<RemoteRepoId> {
        RemoteRepoId::parse(&self.repo_full_name)
    }

    pub fn is_bound(&self) -> bool {
        self.repo_id().is_some()
    }
}

/// World name → binding, keyed by exact-case names
pub type BindingTable = BTreeMap<LogicalName, RepositoryBinding>;

/// Everything persisted in the bindings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingDocument {
    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub backed_up_worlds: BindingTable,

    /// Worlds deleted locally while a repository existed; not re-listed until re-enabled
    #[serde(default)]
    pub no_backup_worlds: BTreeSet<LogicalName>,
}

/// Loads and saves the bindings file
#[derive(Debug, Clone)]
pub struct BindingStore {
    path: PathBuf,
}

impl BindingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, an absent file yields an empty document
    pub fn load(&self) -> Result<BindingDocument> {
        if !self.path.exists() {
            debug!("No bindings file at {}, starting empty", self.path.display());
            return Ok(BindingDocument::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read bindings file: {:?}", self.path))?;

        if content.trim().is_empty() {
            return Ok(BindingDocument::default());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse bindings file: {:?}", self.path))
    }

    /// Write the whole document through a temp file and rename
    pub fn save(&self, document: &BindingDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create bindings directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(document).context("Failed to serialize bindings")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write bindings file: {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace bindings file: {:?}", self.path))?;

        debug!(
            "Saved {} bindings to {}",
            document.backed_up_worlds.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = BindingStore::new(temp_dir.path().join("bindings.json"));
        let doc = store.load().unwrap();
        assert!(doc.backed_up_worlds.is_empty());
        assert!(doc.access_token.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = BindingStore::new(temp_dir.path().join("nested").join("bindings.json"));

        let mut doc = BindingDocument {
            access_token: "ghp_test".to_string(),
            ..Default::default()
        };
        doc.backed_up_worlds.insert(
            "My World".to_string(),
            RepositoryBinding::new("steve/minecraft-world-My-World", true),
        );
        doc.no_backup_worlds.insert("Old World".to_string());

        store.save(&doc).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_parses_persisted_schema() {
        let json = r#"{
            "accessToken": "ghp_abc",
            "backedUpWorlds": {
                "World": { "repoFullName": "steve/minecraft-world-World", "enabled": true },
                "world": { "repoFullName": "", "enabled": false }
            }
        }"#;
        let doc: BindingDocument = serde_json::from_str(json).unwrap();

        assert_eq!(doc.access_token, "ghp_abc");
        assert_eq!(doc.backed_up_worlds.len(), 2);
        assert!(doc.backed_up_worlds["World"].is_bound());
        assert!(!doc.backed_up_worlds["world"].is_bound());
        assert!(doc.no_backup_worlds.is_empty());
    }

    #[test]
    fn test_unparseable_repo_is_unbound() {
        let binding = RepositoryBinding::new("not-a-full-name", true);
        assert!(binding.repo_id().is_none());
    }
}
