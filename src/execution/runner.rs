//! Pipeline runner: drives one target through the five stages

use crate::core::results::SequenceBuilder;
use crate::core::{
    Archive, Build, BuildLog, BuildTargetConfig, Distribute, Notify, PipelineResults,
    SequenceResults, Source, StageKind, StepError, StepResults, Workspace,
};
use crate::execution::{CancellationFlag, EventHandler, PipelineEvent};
use crate::modules::{ModuleLoader, RegisteredStage};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const CANCELLED: &str = "Build cancelled";

/// Runs build targets through the module loader
pub struct PipelineRunner {
    loader: Arc<ModuleLoader>,
    event_handlers: Vec<EventHandler>,
}

impl PipelineRunner {
    pub fn new(loader: Arc<ModuleLoader>) -> Self {
        Self {
            loader,
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    fn emit(&self, event: PipelineEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run every stage of `target` in order
    ///
    /// Never fails: problems are recorded in the stage results. A stage whose
    /// predecessor failed is skipped, except Notify, which always receives the
    /// Distribute results. Once `cancel` is set the remaining stages are skipped.
    pub async fn run(
        &self,
        target: &BuildTargetConfig,
        workspace: &Workspace,
        log: &BuildLog,
        cancel: &CancellationFlag,
    ) -> PipelineResults {
        let build_id = workspace.build_id;
        info!("Running target '{}' of project '{}'", target.name, workspace.project);
        log.info(format!("Running target '{}'", target.name));
        self.emit(PipelineEvent::PipelineStarted {
            build_id,
            target: target.name.clone(),
        });

        let mut run = StageRun {
            target,
            workspace,
            log,
            cancel,
            cancelled: false,
        };

        let source = match workspace.prepare().await {
            Ok(()) => self.run_stage::<Source>(&mut run, &(), None).await,
            Err(e) => {
                let reason = format!(
                    "Failed to prepare workspace {}: {}",
                    workspace.root.display(),
                    e
                );
                warn!("{}", reason);
                log.info(reason.clone());
                self.emit(PipelineEvent::StageSkipped {
                    build_id,
                    stage: StageKind::Source,
                    reason: Some(reason.clone()),
                });
                SequenceResults::skipped(StageKind::Source, reason)
            }
        };

        let gate = gate_after(&source);
        let build = self.run_stage::<Build>(&mut run, &source, gate).await;

        let gate = gate_after(&build);
        let archive = self.run_stage::<Archive>(&mut run, &build, gate).await;

        let gate = gate_after(&archive);
        let distribute = self.run_stage::<Distribute>(&mut run, &archive, gate).await;

        let notify = self.run_stage::<Notify>(&mut run, &distribute, None).await;

        let results = PipelineResults {
            target: target.name.clone(),
            source,
            build,
            archive,
            distribute,
            notify,
            cancelled: run.cancelled,
        };

        let success = results.is_success();
        info!(
            "Target '{}' finished: {}",
            target.name,
            if run.cancelled {
                "cancelled"
            } else if success {
                "success"
            } else {
                "failed"
            }
        );
        self.emit(PipelineEvent::PipelineFinished {
            build_id,
            target: target.name.clone(),
            success,
            cancelled: run.cancelled,
        });

        results
    }

    async fn run_stage<S: RegisteredStage>(
        &self,
        run: &mut StageRun<'_>,
        input: &S::Input,
        gate: Option<String>,
    ) -> SequenceResults<S::Output> {
        let build_id = run.workspace.build_id;

        if run.cancel.is_cancelled() {
            run.cancelled = true;
            return self.skip(build_id, SequenceResults::skipped(S::KIND, CANCELLED));
        }

        if let Some(reason) = gate {
            debug!("Skipping {} stage: {}", S::KIND, reason);
            return self.skip(build_id, SequenceResults::skipped(S::KIND, reason));
        }

        let configs = run.target.steps(S::KIND);
        if configs.is_empty() {
            return self.skip(build_id, SequenceResults::empty(S::KIND));
        }

        info!("Starting {} stage ({} steps)", S::KIND, configs.len());
        self.emit(PipelineEvent::StageStarted {
            build_id,
            stage: S::KIND,
            steps: configs.len(),
        });

        let started = Instant::now();
        let mut sequence = SequenceBuilder::new(S::KIND);

        for config in configs {
            if run.cancel.is_cancelled() {
                run.cancelled = true;
                sequence.fail(CANCELLED);
                break;
            }

            let step_name = config.name().to_string();
            let logger = run.log.for_step(S::KIND, &step_name);
            self.emit(PipelineEvent::StepStarted {
                build_id,
                stage: S::KIND,
                step: step_name.clone(),
            });

            let mut step = match self.loader.create_pipeline_step::<S>(
                Arc::clone(config),
                run.workspace,
                logger.clone(),
            ) {
                Ok(step) => step,
                Err(e) => {
                    logger.error(e.to_string());
                    self.emit(PipelineEvent::StepFinished {
                        build_id,
                        stage: S::KIND,
                        step: step_name,
                        success: false,
                        error: Some(e.to_string()),
                    });
                    sequence.fail(e.to_string());
                    break;
                }
            };

            let outcome = AssertUnwindSafe(step.execute_step(input, run.workspace))
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    // The step broke its contract; contain it to this stage
                    warn!("{} step '{}' raised an error: {:#}", S::KIND, step_name, e);
                    logger.error(format!("Step raised an error: {:#}", e));
                    sequence.fail(format!("Step '{}' raised an error: {:#}", step_name, e));
                    StepResults::failure(&step_name, StepError::from_error(&e))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("{} step '{}' panicked: {}", S::KIND, step_name, message);
                    logger.error(format!("Step panicked: {}", message));
                    sequence.fail(format!("Step '{}' panicked: {}", step_name, message));
                    StepResults::failure(
                        &step_name,
                        StepError::new("StepExecutionError", format!("panicked: {}", message)),
                    )
                }
            };

            self.emit(PipelineEvent::StepFinished {
                build_id,
                stage: S::KIND,
                step: step_name,
                success: result.is_success,
                error: result.error.as_ref().map(|e| e.to_string()),
            });

            if !sequence.push(result) {
                break;
            }
        }

        let results = sequence.finish(started.elapsed());
        self.emit(PipelineEvent::StageFinished {
            build_id,
            stage: S::KIND,
            success: results.is_success,
            duration: results.duration,
        });
        results
    }

    fn skip<O>(&self, build_id: u64, results: SequenceResults<O>) -> SequenceResults<O> {
        self.emit(PipelineEvent::StageSkipped {
            build_id,
            stage: results.stage,
            reason: results.error.clone(),
        });
        results
    }
}

/// Per-run state threaded through the stages
struct StageRun<'a> {
    target: &'a BuildTargetConfig,
    workspace: &'a Workspace,
    log: &'a BuildLog,
    cancel: &'a CancellationFlag,
    cancelled: bool,
}

/// Text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Reason to skip the stage that follows `previous`, if it failed
fn gate_after<O>(previous: &SequenceResults<O>) -> Option<String> {
    (!previous.is_success).then(|| format!("Skipped because the {} stage failed", previous.stage))
}
