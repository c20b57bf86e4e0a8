//! Fixtures for tests that drive real `git` against local bare repositories

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use worldsync::naming::{logical_name_from_repo, LogicalName, DEFAULT_REPO_PREFIX};
use worldsync::{
    derive_repo_name, Config, DirectoryScanner, GitClient, Notifier, ReconciliationEngine,
    RemoteCatalog, RemoteRepoId, RetryableFileOps, SyncOperation, SyncResult,
};

pub const OWNER: &str = "steve";

/// A saves root and a directory of bare "remote" repositories
pub struct GitFixture {
    pub temp: TempDir,
    pub saves: PathBuf,
    pub remotes: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let saves = temp.path().join("saves");
        let remotes = temp.path().join("remotes");
        std::fs::create_dir_all(&saves).unwrap();
        std::fs::create_dir_all(remotes.join(OWNER)).unwrap();
        Self {
            temp,
            saves,
            remotes,
        }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.saves_directory = self.saves.display().to_string();
        config.github.git_base_url = format!("file://{}", self.remotes.display());
        config.sync.delete_backoff_ms = 1;
        config.sync.delete_attempts = 2;
        config
    }

    pub fn world(&self, name: &str) -> PathBuf {
        self.saves.join(name)
    }

    pub fn catalog(&self) -> Arc<LocalCatalog> {
        Arc::new(LocalCatalog {
            remotes: self.remotes.clone(),
        })
    }

    pub fn operation(&self) -> SyncOperation {
        let config = self.config();
        SyncOperation::new(
            Arc::new(GitClient::new(&config, None)),
            self.catalog(),
            RetryableFileOps::new(config.sync.delete_attempts, config.delete_backoff()),
            config.github.git_base_url.clone(),
        )
    }

    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(
            DirectoryScanner::new(&self.saves),
            self.catalog(),
            self.operation(),
            Notifier::new(),
            2,
        )
    }

    /// Create the bare remote for a world and return its id
    pub fn bare_repo(&self, world: &str) -> RemoteRepoId {
        let name = derive_repo_name(DEFAULT_REPO_PREFIX, world);
        create_bare(&self.remotes.join(OWNER).join(format!("{}.git", name)));
        RemoteRepoId::new(OWNER, name)
    }

    /// Commit ids of `main` in the remote for `id`
    pub fn remote_head(&self, id: &RemoteRepoId) -> Option<String> {
        let git_dir = self.remotes.join(id.owner()).join(format!("{}.git", id.name()));
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(&git_dir)
            .args(["rev-parse", "--verify", "refs/heads/main"])
            .output()
            .unwrap();
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Write the files a freshly saved world has
pub fn write_world(dir: &Path, seed: &str) {
    std::fs::create_dir_all(dir.join("region")).unwrap();
    std::fs::write(dir.join("level.dat"), format!("level {}", seed)).unwrap();
    std::fs::write(dir.join("region").join("r.0.0.mca"), format!("chunks {}", seed)).unwrap();
}

pub fn create_bare(path: &Path) {
    std::fs::create_dir_all(path).unwrap();
    git(path, &["init", "--bare", "--quiet"]);
    // Pushes and clones use main regardless of the local git default
    git(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Catalog over `remotes/<owner>/<name>.git` directories
pub struct LocalCatalog {
    remotes: PathBuf,
}

#[async_trait]
impl RemoteCatalog for LocalCatalog {
    async fn list_tracked_repositories(&self) -> SyncResult<BTreeMap<LogicalName, RemoteRepoId>> {
        let mut found = BTreeMap::new();
        for entry in std::fs::read_dir(self.remotes.join(OWNER))? {
            let file_name = entry?.file_name().to_string_lossy().into_owned();
            let Some(repo) = file_name.strip_suffix(".git") else {
                continue;
            };
            if let Some(logical) = logical_name_from_repo(DEFAULT_REPO_PREFIX, repo) {
                found.insert(logical, RemoteRepoId::new(OWNER, repo));
            }
        }
        Ok(found)
    }

    async fn create_if_absent(&self, logical_name: &str) -> SyncResult<RemoteRepoId> {
        let name = derive_repo_name(DEFAULT_REPO_PREFIX, logical_name);
        let path = self.remotes.join(OWNER).join(format!("{}.git", name));
        if !path.exists() {
            create_bare(&path);
        }
        Ok(RemoteRepoId::new(OWNER, name))
    }
}
