//! Events emitted while a pipeline runs

use crate::core::StageKind;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PipelineStarted {
        build_id: u64,
        target: String,
    },
    StageStarted {
        build_id: u64,
        stage: StageKind,
        steps: usize,
    },
    /// The stage ran nothing: no steps configured, gated off or cancelled
    StageSkipped {
        build_id: u64,
        stage: StageKind,
        reason: Option<String>,
    },
    StepStarted {
        build_id: u64,
        stage: StageKind,
        step: String,
    },
    StepFinished {
        build_id: u64,
        stage: StageKind,
        step: String,
        success: bool,
        error: Option<String>,
    },
    StageFinished {
        build_id: u64,
        stage: StageKind,
        success: bool,
        duration: Duration,
    },
    PipelineFinished {
        build_id: u64,
        target: String,
        success: bool,
        cancelled: bool,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;
