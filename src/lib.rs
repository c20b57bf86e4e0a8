//! worldsync - keeps game save folders mirrored to private GitHub repositories
//!
//! Each subdirectory of the saves root is a world. An enabled world is a git
//! working copy bound to one private repository; pushes are local-wins and pulls
//! are remote-wins. A reconciliation pass merges the local scan, the remote
//! catalog and the persisted bindings, then creates and pulls what is missing.
//!
//! ## Modules
//!
//! - [`engine`]: reconciliation and host triggers
//! - [`sync`]: push, pull and unbind for one directory
//! - [`git`]: the `git` binary behind the [`git::Vcs`] trait
//! - [`github`]: repository catalog over the GitHub REST API
//! - [`bindings`]: the persisted binding table
//! - [`config`]: YAML configuration with XDG locations

pub mod bindings;
pub mod config;
pub mod engine;
pub mod error;
pub mod fileops;
pub mod git;
pub mod github;
pub mod health;
pub mod naming;
pub mod notify;
pub mod scanner;
pub mod sidecar;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;

pub use bindings::{BindingDocument, BindingStore, RepositoryBinding};
pub use config::Config;
pub use engine::{ReconcileReport, ReconciliationEngine};
pub use error::{SyncError, SyncResult};
pub use fileops::RetryableFileOps;
pub use git::{GitClient, Vcs};
pub use github::{GitHubCatalog, RemoteCatalog};
pub use health::HealthCheck;
pub use naming::{derive_repo_name, RemoteRepoId};
pub use notify::{Notifier, StatusMessage};
pub use scanner::DirectoryScanner;
pub use state::{EventType, Severity, StateDb};
pub use sync::{SyncOperation, SyncOutcome};
