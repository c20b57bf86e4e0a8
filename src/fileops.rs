//! Removal of version-control metadata that may still be held open
//!
//! A git process that just exited (or a virus scanner looking at the pack
//! files) can keep handles open for a short while, and git marks objects
//! read-only. Deletion is therefore attempted a bounded number of times with a
//! doubling backoff, clearing read-only bits between attempts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct RetryableFileOps {
    attempts: u32,
    backoff: Duration,
}

impl RetryableFileOps {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Remove a file or directory tree; a path that is already gone counts as removed
    pub async fn remove(&self, path: &Path) -> std::io::Result<()> {
        let mut delay = self.backoff;
        let mut attempt = 1;

        loop {
            match remove_path(path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) if attempt >= self.attempts => {
                    warn!(
                        "Giving up on {} after {} attempts: {}",
                        path.display(),
                        attempt,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        "Removing {} failed (attempt {}/{}): {}",
                        path.display(),
                        attempt,
                        self.attempts,
                        e
                    );
                    clear_readonly(path);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    /// Remove every path, returning the ones still present afterwards
    pub async fn remove_all(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut leftovers = Vec::new();
        for path in paths {
            if self.remove(path).await.is_err() && path.exists() {
                leftovers.push(path.clone());
            }
        }
        leftovers
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) {
    for entry in WalkDir::new(path).into_iter().flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            if let Err(e) = std::fs::set_permissions(entry.path(), permissions) {
                debug!("Could not clear read-only on {}: {}", entry.path().display(), e);
            }
        }
    }
}
