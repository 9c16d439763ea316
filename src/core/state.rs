//! Build status models

use crate::core::{config::ProjectConfig, log::BuildLog, results::PipelineResults};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle status of a queued build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    /// Waiting in the queue, or running but not yet finished
    Queued,
    /// Every requested target's pipeline succeeded
    Complete,
    /// At least one requested target's pipeline failed
    Failed,
    /// Removed from the queue or stopped between steps
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildStatus::Queued)
    }
}

/// A queued, running or finished build
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    /// Unique for the life of the agent process
    pub id: u64,

    pub project_name: String,

    #[serde(skip)]
    pub project: Arc<ProjectConfig>,

    /// Target this build runs, resolved when the build was queued
    pub target: String,

    pub status: BuildStatus,

    pub queued_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Stage results, once the pipeline has run
    pub results: Option<PipelineResults>,

    /// Failure outside any pipeline stage, such as a crashed build task
    pub error: Option<String>,

    #[serde(skip)]
    pub log: BuildLog,
}

impl BuildResult {
    pub fn new(id: u64, project: Arc<ProjectConfig>, target: impl Into<String>) -> Self {
        Self {
            id,
            project_name: project.name.clone(),
            project,
            target: target.into(),
            status: BuildStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            results: None,
            error: None,
            log: BuildLog::new(id),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && !self.status.is_terminal()
    }
}

/// Counts shown alongside the queue listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a BuildResult>) -> Self {
        let mut summary = QueueSummary::default();
        for result in results {
            match result.status {
                BuildStatus::Queued if result.is_running() => summary.running += 1,
                BuildStatus::Queued => summary.queued += 1,
                BuildStatus::Complete => summary.completed += 1,
                BuildStatus::Failed => summary.failed += 1,
                BuildStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}
