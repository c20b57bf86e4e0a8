//! Error taxonomy for sync and catalog operations
//!
//! Every failure that can happen while talking to GitHub or driving git is
//! mapped onto one of these variants. None of them is fatal: the engine turns
//! them into status messages and leaves the next reconciliation pass to pick
//! up whatever was left half done.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by [`crate::sync::SyncOperation`] and [`crate::github::RemoteCatalog`]
#[derive(Debug, Error)]
pub enum SyncError {
    /// Credential missing or rejected by the hosting service
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Remote repository does not exist (or is not visible to this token)
    #[error("remote repository not found: {0}")]
    NotFound(String),

    /// Transport failure talking to the hosting service
    #[error("network error: {0}")]
    Network(String),

    /// Target directory has unrelated files and no working copy
    #[error("{} contains files that are not under version control", .0.display())]
    LocalConflict(PathBuf),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Push attempted on a directory holding only metadata
    #[error("{} has no content to back up", .0.display())]
    EmptyContent(PathBuf),

    /// Any other failed git command
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    /// Settings that make an operation impossible
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Short label used in status messages and the event log
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::NotFound(_) => "not_found",
            SyncError::Network(_) => "network",
            SyncError::LocalConflict(_) => "local_conflict",
            SyncError::Io(_) => "io",
            SyncError::EmptyContent(_) => "empty_content",
            SyncError::Git { .. } => "git",
            SyncError::Config(_) => "config",
        }
    }

    /// Human-readable explanation suitable for the host's notification area
    pub fn user_message(&self, world: &str) -> String {
        match self {
            SyncError::Auth(_) => format!(
                "Sync FAILED for {}: GitHub token missing, invalid or expired.",
                world
            ),
            SyncError::NotFound(_) => format!(
                "Sync FAILED for {}: Repository not found or access denied.",
                world
            ),
            SyncError::Network(_) => format!(
                "Sync FAILED for {}: Could not reach GitHub. Check your connection.",
                world
            ),
            SyncError::LocalConflict(_) => format!(
                "{} exists locally but is not a Git repo. Move or back up its files to restore it from GitHub.",
                world
            ),
            SyncError::EmptyContent(_) => format!(
                "World folder '{}' is empty. Load and save the world at least once before enabling backup.",
                world
            ),
            SyncError::Io(e) => format!("Sync FAILED for {}: {}", world, e),
            SyncError::Git { message, .. } => format!(
                "Sync FAILED for {}: {}",
                world,
                message.lines().next().unwrap_or("git error")
            ),
            SyncError::Config(msg) => format!("Sync skipped for {}: {}", world, msg),
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
