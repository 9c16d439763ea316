//! Agent directories on the local machine

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the agent's directory under the platform base directory
const AGENT_DIR: &str = "forgeline";

/// Where the agent keeps build workspaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFilesystem {
    base_dir: PathBuf,
}

impl AgentFilesystem {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Use the platform's local data directory, falling back to the current directory
    pub fn platform_default() -> Self {
        Self::new(dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Parent of every target workspace
    pub fn builds_dir(&self) -> PathBuf {
        self.base_dir.join(AGENT_DIR).join("builds")
    }

    /// Check the base directory exists and create the builds directory under it
    pub async fn prepare(&self) -> Result<PathBuf> {
        if !tokio::fs::metadata(&self.base_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return Err(Error::DirectoryNotFound(self.base_dir.clone()));
        }

        let builds = self.builds_dir();
        tokio::fs::create_dir_all(&builds).await?;
        debug!("Build output directory: {}", builds.display());
        Ok(builds)
    }
}
