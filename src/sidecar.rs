//! `.worldsyncer.json` records the exact world name inside the working copy so a
//! clone that lands under a differently-cased directory can be renamed back.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::SyncResult;

pub const SIDECAR_FILE: &str = ".worldsyncer.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    pub real_world_name: String,
}

impl Sidecar {
    pub fn new(real_world_name: impl Into<String>) -> Self {
        Self {
            real_world_name: real_world_name.into(),
        }
    }

    /// Read the sidecar; absent or unreadable files yield `None`
    pub async fn read(dir: &Path) -> Option<Self> {
        let path = dir.join(SIDECAR_FILE);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<Sidecar>(&content) {
            Ok(sidecar) if !sidecar.real_world_name.trim().is_empty() => Some(sidecar),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn write(&self, dir: &Path) -> SyncResult<()> {
        let content = serde_json::to_string(self).map_err(std::io::Error::other)?;
        tokio::fs::write(dir.join(SIDECAR_FILE), content).await?;
        Ok(())
    }
}
