//! Step contracts implemented by every stage module

use crate::core::{
    config::StepConfig,
    log::StepLogger,
    results::{StepError, StepResults},
    stage::{SourceOutput, Stage},
    workspace::Workspace,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A disposable, per-execution instance of a stage module
///
/// The loader creates the step, calls [`initialize`](Self::initialize)
/// exactly once and then [`execute_step`](Self::execute_step) exactly once.
#[async_trait]
pub trait PipelineStep<S: Stage>: Send {
    /// Bind the configuration and execution context
    fn initialize(
        &mut self,
        config: Arc<dyn StepConfig>,
        workspace: &Workspace,
        logger: StepLogger,
    ) -> anyhow::Result<()>;

    /// Perform the work of the step
    ///
    /// Failures belong in the returned [`StepResults`]. Returning `Err` is
    /// treated by the runner as a stage failure.
    async fn execute_step(
        &mut self,
        input: &S::Input,
        workspace: &Workspace,
    ) -> anyhow::Result<StepResults<S::Output>>;
}

/// Operations a source step uses to decide between updating and downloading
#[async_trait]
pub trait SourceControl: Send {
    fn is_working_copy_initialized(&self, workspace: &Workspace) -> bool;

    async fn current_commit(&self, workspace: &Workspace) -> anyhow::Result<Option<String>>;

    /// Fetch a fresh working copy
    async fn download(&mut self, workspace: &Workspace) -> anyhow::Result<()>;

    /// Bring an existing working copy up to date
    async fn update(&mut self, workspace: &Workspace) -> anyhow::Result<()>;
}

/// Update the working copy if there is one, download it otherwise, and
/// report the resulting commit
pub async fn sync_working_copy<T: SourceControl + ?Sized>(
    source: &mut T,
    step_name: &str,
    workspace: &Workspace,
    logger: &StepLogger,
) -> StepResults<SourceOutput> {
    let synced = if source.is_working_copy_initialized(workspace) {
        logger.info("Updating existing working copy");
        source.update(workspace).await
    } else {
        logger.info("Downloading working copy");
        source.download(workspace).await
    };

    if let Err(e) = synced {
        logger.error(format!("Source sync failed: {:#}", e));
        return StepResults::failure(step_name, StepError::from_error(&e));
    }

    match source.current_commit(workspace).await {
        Ok(commit) => {
            if let Some(commit) = &commit {
                logger.info(format!("Working copy at {}", commit));
            }
            StepResults::success(step_name, SourceOutput { commit })
        }
        Err(e) => StepResults::failure(step_name, StepError::from_error(&e)),
    }
}
