//! Sync operation - drives one world directory through bind, sync and unbind
//!
//! Push is local-wins: the working copy is committed and force-pushed. Pull is
//! remote-wins: the working copy is hard-reset to the remote branch and
//! untracked files are cleaned. Nothing here retries except the single
//! create-then-clone fallback; leftovers are picked up by the next pass.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::fileops::RetryableFileOps;
use crate::git::Vcs;
use crate::github::RemoteCatalog;
use crate::naming::RemoteRepoId;
use crate::scanner::{has_real_content, is_non_empty_dir, working_copy_state_at, WorkingCopyState};
use crate::sidecar::{Sidecar, SIDECAR_FILE};

/// Files the game rewrites constantly or that are useless in a backup
pub const GITIGNORE_CONTENT: &str = "\
session.lock
logs/
crash-reports/
*.tmp
icon.png
level.dat_old
playerdata/*.dat_old
advancements/*.json_old
";

/// Metadata removed when a world stops being synced
pub const UNBIND_ENTRIES: &[&str] = &[".git", ".github", ".gitignore", ".gitattributes", SIDECAR_FILE];

/// Result of one sync operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Committed and pushed; `renamed_to` is set when the directory was re-cased afterwards
    Pushed { renamed_to: Option<String> },
    /// Working copy already matched the last commit
    NothingToBackup,
    /// Hard-reset to the remote and pulled
    Pulled { renamed_to: Option<String> },
    /// Remote has no sync branch yet
    NothingToPull,
    /// Fresh clone into an absent or empty directory
    Cloned,
    /// Remote was missing, created, and cloned; the caller must persist the id
    ClonedAfterCreate { repo_id: RemoteRepoId },
    /// Metadata removed; `leftovers` could not be deleted within the retry budget
    Unbound { leftovers: Vec<PathBuf> },
}

/// Performs push, pull and unbind for single directories
#[derive(Clone)]
pub struct SyncOperation {
    vcs: Arc<dyn Vcs>,
    catalog: Arc<dyn RemoteCatalog>,
    fileops: RetryableFileOps,
    git_base_url: String,
}

impl SyncOperation {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        catalog: Arc<dyn RemoteCatalog>,
        fileops: RetryableFileOps,
        git_base_url: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            catalog,
            fileops,
            git_base_url: git_base_url.into(),
        }
    }

    fn remote_url(&self, repo_id: &RemoteRepoId) -> String {
        repo_id.remote_url(&self.git_base_url)
    }

    /// Commit everything in `dir` and force-push it to `repo_id`
    pub async fn bind_and_push(&self, dir: &Path, repo_id: &RemoteRepoId) -> SyncResult<SyncOutcome> {
        if !has_real_content(dir) {
            return Err(SyncError::EmptyContent(dir.to_path_buf()));
        }

        let url = self.remote_url(repo_id);

        if working_copy_state_at(dir) == WorkingCopyState::Absent {
            // A .git without config is a broken leftover
            let git_dir = dir.join(".git");
            if git_dir.exists() {
                debug!("Removing incomplete {}", git_dir.display());
                self.fileops.remove(&git_dir).await?;
            }

            info!("Initializing working copy in {}", dir.display());
            self.vcs.init(dir).await?;
            tokio::fs::write(dir.join(".gitignore"), GITIGNORE_CONTENT).await?;
        }
        self.vcs.set_remote(dir, &url).await?;

        Sidecar::new(canonical_name(dir).await?).write(dir).await?;

        self.vcs.add_all(dir).await?;
        let had_head = self.vcs.has_head(dir).await;
        if had_head && self.vcs.is_clean(dir).await? {
            debug!("Nothing to back up in {}", dir.display());
            return Ok(SyncOutcome::NothingToBackup);
        }

        let message = if had_head {
            format!("Automated backup: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))
        } else {
            "Initial commit".to_string()
        };
        self.vcs.commit(dir, &message).await?;
        self.vcs.push(dir).await?;
        info!("Pushed {} to {}", dir.display(), repo_id);

        let renamed_to = self.rename_to_canonical_casing(dir).await;
        Ok(SyncOutcome::Pushed { renamed_to })
    }

    /// Make `dir` an exact copy of `repo_id`, discarding local edits
    pub async fn bind_and_pull(
        &self,
        logical_name: &str,
        dir: &Path,
        repo_id: &RemoteRepoId,
    ) -> SyncResult<SyncOutcome> {
        if working_copy_state_at(dir) == WorkingCopyState::Absent {
            return self.clone_world(logical_name, dir, repo_id).await;
        }

        let mut dir = dir.to_path_buf();
        let mut renamed_to = None;
        if let Some(sidecar) = Sidecar::read(&dir).await {
            if let Some(new_dir) = self.rename_to_recorded_name(&dir, &sidecar.real_world_name).await? {
                renamed_to = Some(sidecar.real_world_name);
                dir = new_dir;
            }
        }

        self.vcs.set_remote(&dir, &self.remote_url(repo_id)).await?;
        self.vcs.fetch(&dir).await?;
        if !self.vcs.has_remote_branch(&dir).await? {
            debug!("{} has no branch to pull yet", repo_id);
            return Ok(SyncOutcome::NothingToPull);
        }

        self.vcs.reset_hard(&dir).await?;
        self.vcs.clean(&dir).await?;
        self.vcs.pull(&dir).await?;
        info!("Pulled {} into {}", repo_id, dir.display());

        Ok(SyncOutcome::Pulled { renamed_to })
    }

    async fn clone_world(
        &self,
        logical_name: &str,
        dir: &Path,
        repo_id: &RemoteRepoId,
    ) -> SyncResult<SyncOutcome> {
        let git_dir = dir.join(".git");
        if git_dir.exists() {
            debug!("Removing incomplete {}", git_dir.display());
            self.fileops.remove(&git_dir).await?;
        }

        if is_non_empty_dir(dir) {
            return Err(SyncError::LocalConflict(dir.to_path_buf()));
        }

        info!("Cloning {} into {}", repo_id, dir.display());
        match self.vcs.clone_repo(&self.remote_url(repo_id), dir).await {
            Ok(()) => Ok(SyncOutcome::Cloned),
            Err(SyncError::NotFound(reason)) => {
                warn!("{} not found ({}), creating it", repo_id, reason);
                let created = self.catalog.create_if_absent(logical_name).await?;
                self.vcs.clone_repo(&self.remote_url(&created), dir).await?;
                Ok(SyncOutcome::ClonedAfterCreate { repo_id: created })
            }
            Err(e) => Err(e),
        }
    }

    /// Remove all backup metadata from `dir`; world files are never touched
    pub async fn unbind(&self, dir: &Path) -> SyncResult<SyncOutcome> {
        let targets: Vec<PathBuf> = UNBIND_ENTRIES.iter().map(|entry| dir.join(entry)).collect();
        let leftovers = self.fileops.remove_all(&targets).await;

        for path in &leftovers {
            warn!("Could not remove {}, will retry on the next pass", path.display());
        }
        Ok(SyncOutcome::Unbound { leftovers })
    }

    /// Re-case `dir` to the name the filesystem resolves it to
    async fn rename_to_canonical_casing(&self, dir: &Path) -> Option<String> {
        let canonical = tokio::fs::canonicalize(dir).await.ok()?;
        let canonical_name = canonical.file_name()?.to_str()?.to_string();
        let current_name = dir.file_name()?.to_str()?;

        if canonical_name == current_name || !canonical_name.eq_ignore_ascii_case(current_name) {
            return None;
        }

        match self.rename_to_recorded_name(dir, &canonical_name).await {
            Ok(Some(_)) => Some(canonical_name),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not rename {} to {}: {}", dir.display(), canonical_name, e);
                None
            }
        }
    }

    /// Rename `dir` to `name` unless it already has that name or another directory holds it
    async fn rename_to_recorded_name(&self, dir: &Path, name: &str) -> SyncResult<Option<PathBuf>> {
        let current = dir_name(dir)?;
        if current == name || name.is_empty() || name.contains(['/', '\\']) {
            return Ok(None);
        }
        let Some(parent) = dir.parent() else {
            return Ok(None);
        };
        let target = parent.join(name);

        if tokio::fs::try_exists(&target).await? && !same_entry(dir, &target).await {
            warn!(
                "Not renaming {} to {}: a different directory already exists",
                dir.display(),
                target.display()
            );
            return Ok(None);
        }

        tokio::fs::rename(dir, &target).await?;
        info!("Renamed {} to {}", dir.display(), target.display());
        Ok(Some(target))
    }
}

fn dir_name(dir: &Path) -> SyncResult<String> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| SyncError::Config(format!("{} has no usable directory name", dir.display())))
}

/// Name the filesystem resolves `dir` to, falling back to the name as given
async fn canonical_name(dir: &Path) -> SyncResult<String> {
    match tokio::fs::canonicalize(dir).await {
        Ok(resolved) => dir_name(&resolved),
        Err(_) => dir_name(dir),
    }
}

// Case-insensitive filesystems resolve both spellings to one directory
async fn same_entry(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
