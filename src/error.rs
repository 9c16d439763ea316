//! Error types shared by the registry, loader and build queue

use crate::core::StageKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced synchronously by the engine
///
/// Failures inside a running step never show up here; they are captured in
/// the step's own [`StepResults`](crate::core::StepResults).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("No {stage} module registered for step config '{tag}'")]
    ModuleLoad { stage: StageKind, tag: String },

    #[error("Failed to load plugin {}: {reason}", path.display())]
    PluginLoad { path: PathBuf, reason: String },

    #[error("A {stage} module for config type {config_type} is already registered")]
    DuplicateModule { stage: StageKind, config_type: String },

    #[error("Step config name '{tag}' is claimed by more than one {stage} module")]
    AmbiguousDiscriminator { stage: StageKind, tag: String },

    #[error("Module '{module}' provides a {actual} step, but a {expected} step was requested")]
    StepTypeMismatch {
        module: String,
        expected: StageKind,
        actual: StageKind,
    },

    #[error("Module '{module}' rejected its configuration: {message}")]
    StepInitialization { module: String, message: String },

    #[error("Build {0} not found")]
    BuildNotFound(u64),

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Build queue is already running")]
    QueueAlreadyStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a request front end should report this as the caller's fault (4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::ConfigValidation(_)
                | Error::ModuleLoad { .. }
                | Error::StepTypeMismatch { .. }
                | Error::StepInitialization { .. }
                | Error::BuildNotFound(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
