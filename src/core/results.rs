//! Step and stage result records

use crate::core::stage::{
    ArchiveOutput, BuildOutput, DistributeOutput, NotifyOutput, SourceOutput, StageKind,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error captured inside a step result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Short classification, e.g. `NonZeroExit`
    pub kind: String,

    /// Human-readable message
    pub message: String,
}

impl StepError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Capture an error raised while executing a step
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::new("StepExecutionError", format!("{:#}", err))
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of a single step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResults<O> {
    /// Config name of the step that produced this result
    pub step_name: String,

    pub is_success: bool,

    pub error: Option<StepError>,

    /// Category-specific payload
    pub output: O,
}

impl<O: Default> StepResults<O> {
    pub fn success(step_name: impl Into<String>, output: O) -> Self {
        Self {
            step_name: step_name.into(),
            is_success: true,
            error: None,
            output,
        }
    }

    pub fn failure(step_name: impl Into<String>, error: StepError) -> Self {
        Self {
            step_name: step_name.into(),
            is_success: false,
            error: Some(error),
            output: O::default(),
        }
    }
}

/// Aggregate outcome of one stage of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceResults<O> {
    pub stage: StageKind,

    /// Results of the steps that ran, in configuration order
    pub steps: Vec<StepResults<O>>,

    pub is_success: bool,

    /// True when no step ran, either because none were configured or because
    /// the stage was gated off
    pub is_skipped: bool,

    pub is_mandatory: bool,

    pub duration: Duration,

    /// Stage-level error, such as an unresolvable module or a gated stage
    pub error: Option<String>,
}

impl<O> SequenceResults<O> {
    /// A stage with no configured steps
    pub fn empty(stage: StageKind) -> Self {
        let is_mandatory = stage.is_mandatory();
        Self {
            stage,
            steps: Vec::new(),
            is_success: !is_mandatory,
            is_skipped: true,
            is_mandatory,
            duration: Duration::ZERO,
            error: is_mandatory.then(|| format!("No {} steps configured", stage)),
        }
    }

    /// A stage that was not executed because of an upstream failure or cancellation
    pub fn skipped(stage: StageKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            steps: Vec::new(),
            is_success: false,
            is_skipped: true,
            is_mandatory: stage.is_mandatory(),
            duration: Duration::ZERO,
            error: Some(reason.into()),
        }
    }

    /// The step that stopped this stage, if any
    pub fn failed_step(&self) -> Option<&StepResults<O>> {
        self.steps.iter().find(|step| !step.is_success)
    }

    /// Payloads of the successful steps, in order
    pub fn outputs(&self) -> impl Iterator<Item = &O> {
        self.steps
            .iter()
            .filter(|step| step.is_success)
            .map(|step| &step.output)
    }

    /// Best available description of why the stage failed
    pub fn failure_reason(&self) -> Option<String> {
        if self.is_success {
            return None;
        }
        self.failed_step()
            .and_then(|step| step.error.as_ref().map(|e| e.to_string()))
            .or_else(|| self.error.clone())
    }
}

/// Accumulates step results while a stage is running
pub(crate) struct SequenceBuilder<O> {
    stage: StageKind,
    steps: Vec<StepResults<O>>,
    failed: bool,
    error: Option<String>,
}

impl<O> SequenceBuilder<O> {
    pub(crate) fn new(stage: StageKind) -> Self {
        Self {
            stage,
            steps: Vec::new(),
            failed: false,
            error: None,
        }
    }

    /// Record a step result; returns whether the stage may continue
    pub(crate) fn push(&mut self, result: StepResults<O>) -> bool {
        let ok = result.is_success;
        self.steps.push(result);
        if !ok {
            self.failed = true;
        }
        ok
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.failed = true;
        self.error = Some(error.into());
    }

    pub(crate) fn finish(self, duration: Duration) -> SequenceResults<O> {
        SequenceResults {
            stage: self.stage,
            is_success: !self.failed,
            is_skipped: false,
            is_mandatory: self.stage.is_mandatory(),
            duration,
            error: self.error,
            steps: self.steps,
        }
    }
}

/// The five stage results of one target's pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResults {
    pub target: String,
    pub source: SequenceResults<SourceOutput>,
    pub build: SequenceResults<BuildOutput>,
    pub archive: SequenceResults<ArchiveOutput>,
    pub distribute: SequenceResults<DistributeOutput>,
    pub notify: SequenceResults<NotifyOutput>,

    /// Whether cancellation cut the run short
    pub cancelled: bool,
}

impl PipelineResults {
    /// Notify does not count towards the outcome; Source failures show up
    /// through the gated Build stage.
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.build.is_success
            && self.archive.is_success
            && self.distribute.is_success
    }

    /// `(stage, success, skipped, duration)` for each stage in order
    pub fn stage_summaries(&self) -> [(StageKind, bool, bool, Duration); 5] {
        [
            summary(&self.source),
            summary(&self.build),
            summary(&self.archive),
            summary(&self.distribute),
            summary(&self.notify),
        ]
    }
}

fn summary<O>(sequence: &SequenceResults<O>) -> (StageKind, bool, bool, Duration) {
    (
        sequence.stage,
        sequence.is_success,
        sequence.is_skipped,
        sequence.duration,
    )
}
