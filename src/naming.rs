//! Repository naming convention
//!
//! A world folder `My World` lives in the repository `<owner>/minecraft-world-My-World`.
//! The transform is deterministic and the inverse is used when listing the
//! catalog. Names are never case-folded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default prefix shared by every backup repository
pub const DEFAULT_REPO_PREFIX: &str = "minecraft-world-";

/// GitHub rejects repository names longer than this
pub const MAX_REPO_NAME_LEN: usize = 100;

/// Replaces spaces in world names
pub const NAME_SEPARATOR: char = '-';

/// Exact-case directory name used as the key everywhere
pub type LogicalName = String;

/// `owner/name` identifier of a remote repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteRepoId {
    owner: String,
    name: String,
}

impl RemoteRepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`; anything without exactly one non-empty owner and name is rejected
    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Clone/push URL below a git base such as `https://github.com`
    pub fn remote_url(&self, git_base_url: &str) -> String {
        format!(
            "{}/{}/{}.git",
            git_base_url.trim_end_matches('/'),
            self.owner,
            self.name
        )
    }
}

impl fmt::Display for RemoteRepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Derive the repository name for a world folder
///
/// Spaces become [`NAME_SEPARATOR`], the result is capped at [`MAX_REPO_NAME_LEN`]
/// characters, and a name with nothing after the prefix falls back to
/// `<prefix>unnamed-<n>` with `n` derived from the input.
pub fn derive_repo_name(prefix: &str, logical_name: &str) -> String {
    let derived: String = format!("{}{}", prefix, logical_name.replace(' ', "-"))
        .chars()
        .take(MAX_REPO_NAME_LEN)
        .collect();

    if derived.chars().count() > prefix.chars().count() {
        return derived;
    }

    format!("{}unnamed-{}", prefix, fallback_suffix(logical_name))
        .chars()
        .take(MAX_REPO_NAME_LEN)
        .collect()
}

/// Recover the world name from a repository name, `None` when the prefix does not match
pub fn logical_name_from_repo(prefix: &str, repo_name: &str) -> Option<LogicalName> {
    let rest = repo_name.strip_prefix(prefix)?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.replace(NAME_SEPARATOR, " "))
}

// FNV-1a folded into 0..10000; std's hasher is not stable across releases
fn fallback_suffix(input: &str) -> u32 {
    let hash = input.bytes().fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    (hash % 10_000) as u32
}
