//! Per-target working directories

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Directories a build target works in
///
/// A target keeps the same root across builds so source steps can update an
/// existing working copy instead of downloading it again. Only one build runs
/// at a time, so the directories are never shared between running builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub build_id: u64,
    pub project: String,
    pub target: String,
    pub root: PathBuf,
}

impl Workspace {
    /// Workspace for `project`/`target` under the agent's builds directory
    pub fn new(builds_dir: &Path, build_id: u64, project: &str, target: &str) -> Self {
        let root = builds_dir
            .join(sanitize_component(project))
            .join(sanitize_component(target));
        Self {
            build_id,
            project: project.to_string(),
            target: target.to_string(),
            root,
        }
    }

    /// Working copy fetched by source steps
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    /// Build products
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Archives waiting to be distributed
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// Create every workspace directory
    pub async fn prepare(&self) -> std::io::Result<()> {
        for dir in [self.source_dir(), self.output_dir(), self.archive_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Turn a project or target name into a single safe path component
///
/// Names that need rewriting get a short hash of the original appended, so
/// "Win 64" and "Win_64" land in different directories.
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_-{}", name_hash(name))
    } else if cleaned != name {
        format!("{}-{}", cleaned, name_hash(name))
    } else {
        cleaned
    }
}

/// First 8 hex chars of the name's SHA-256
fn name_hash(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}
