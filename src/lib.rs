//! forgeline - a build agent that runs staged release pipelines through pluggable modules

pub mod agent;
pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod modules;

// Re-export commonly used types
pub use agent::{AgentFilesystem, BuildQueue};
pub use core::{BuildResult, BuildStatus, PipelineResults, ProjectConfig, StageKind};
pub use error::{Error, Result};
pub use execution::{CancellationFlag, PipelineEvent, PipelineRunner};
pub use modules::{ModuleLoader, ModuleRegistry};
