//! In-crate test double for [`Vcs`]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::git::Vcs;

/// Records calls and fakes just enough of `.git` on disk for the scanner
#[derive(Default)]
pub struct FakeVcs {
    pub calls: Mutex<Vec<String>>,
    pub clean: bool,
    pub remote_branch: bool,
    pub clone_not_found_once: Mutex<bool>,
    pub push_delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeVcs {
    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Highest number of pushes observed running at once
    pub fn max_concurrent_pushes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn fake_working_copy(dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir.join(".git"))?;
        std::fs::write(dir.join(".git").join("config"), "")
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn init(&self, dir: &Path) -> SyncResult<()> {
        Self::fake_working_copy(dir)?;
        self.log("init");
        Ok(())
    }

    async fn set_head_branch(&self, _dir: &Path) -> SyncResult<()> {
        self.log("set_head_branch");
        Ok(())
    }

    async fn remote_url(&self, _dir: &Path) -> SyncResult<Option<String>> {
        Ok(None)
    }

    async fn set_remote(&self, _dir: &Path, url: &str) -> SyncResult<()> {
        self.log(format!("set_remote {}", url));
        Ok(())
    }

    async fn add_all(&self, _dir: &Path) -> SyncResult<()> {
        self.log("add_all");
        Ok(())
    }

    async fn has_head(&self, dir: &Path) -> bool {
        dir.join(".git").join("HEAD_COMMITTED").exists()
    }

    async fn is_clean(&self, _dir: &Path) -> SyncResult<bool> {
        Ok(self.clean)
    }

    async fn commit(&self, dir: &Path, message: &str) -> SyncResult<()> {
        std::fs::write(dir.join(".git").join("HEAD_COMMITTED"), "")?;
        self.log(format!("commit {}", message));
        Ok(())
    }

    async fn push(&self, _dir: &Path) -> SyncResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.push_delay.is_zero() {
            tokio::time::sleep(self.push_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log("push");
        Ok(())
    }

    async fn fetch(&self, _dir: &Path) -> SyncResult<()> {
        self.log("fetch");
        Ok(())
    }

    async fn has_remote_branch(&self, _dir: &Path) -> SyncResult<bool> {
        Ok(self.remote_branch)
    }

    async fn reset_hard(&self, _dir: &Path) -> SyncResult<()> {
        self.log("reset_hard");
        Ok(())
    }

    async fn clean(&self, _dir: &Path) -> SyncResult<()> {
        self.log("clean");
        Ok(())
    }

    async fn pull(&self, _dir: &Path) -> SyncResult<()> {
        self.log("pull");
        Ok(())
    }

    async fn clone_repo(&self, url: &str, dir: &Path) -> SyncResult<()> {
        self.log(format!("clone {}", url));
        {
            let mut fail = self.clone_not_found_once.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(SyncError::NotFound("Repository not found".into()));
            }
        }
        Self::fake_working_copy(dir)?;
        Ok(())
    }
}
