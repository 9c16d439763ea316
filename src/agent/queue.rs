//! Build queue with a single worker
//!
//! Producers call [`BuildQueue::enqueue_build`], [`BuildQueue::cancel_build`] and
//! the query methods from any task. One worker task drains the queue in FIFO
//! order and runs builds one at a time. All queue state sits behind one mutex
//! that is never held while a step runs.

use crate::agent::AgentFilesystem;
use crate::core::{
    BuildLog, BuildResult, BuildStatus, PipelineResults, ProjectConfig, QueueSummary, Workspace,
};
use crate::error::{Error, Result};
use crate::execution::{CancellationFlag, PipelineRunner};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Handle to the agent's build queue
#[derive(Clone)]
pub struct BuildQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    runner: Arc<PipelineRunner>,
    state: Mutex<QueueState>,
    work_available: Notify,
    build_finished: Notify,
    started: AtomicBool,
}

struct QueueState {
    next_id: u64,
    pending: VecDeque<u64>,
    active: Option<ActiveBuild>,
    builds: BTreeMap<u64, BuildResult>,
}

struct ActiveBuild {
    id: u64,
    cancel: CancellationFlag,
}

/// Everything the worker needs to run one build without holding the lock
struct BuildJob {
    id: u64,
    project: Arc<ProjectConfig>,
    target: String,
    log: BuildLog,
    cancel: CancellationFlag,
}

impl BuildQueue {
    pub fn new(runner: Arc<PipelineRunner>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                runner,
                state: Mutex::new(QueueState {
                    next_id: 1,
                    pending: VecDeque::new(),
                    active: None,
                    builds: BTreeMap::new(),
                }),
                work_available: Notify::new(),
                build_finished: Notify::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn runner(&self) -> &Arc<PipelineRunner> {
        &self.inner.runner
    }

    /// Prepare the agent directories and spawn the worker
    pub async fn start_queue(&self, filesystem: &AgentFilesystem) -> Result<JoinHandle<()>> {
        let builds_dir = filesystem.prepare().await?;
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::QueueAlreadyStarted);
        }

        info!("Build queue started, workspaces under {}", builds_dir.display());
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(inner.work(builds_dir)))
    }

    /// Queue a build of `target`, or of the project's first target when `None`
    ///
    /// The target and every step's module are checked before anything is
    /// queued; a rejected request leaves the queue untouched.
    pub async fn enqueue_build(
        &self,
        project: Arc<ProjectConfig>,
        target: Option<&str>,
    ) -> Result<BuildResult> {
        let config = match target {
            Some(name) => project.target(name).ok_or_else(|| {
                Error::ConfigValidation(format!(
                    "Project '{}' has no target named '{}'",
                    project.name, name
                ))
            })?,
            None => project.default_target().ok_or_else(|| {
                Error::ConfigValidation(format!("Project '{}' defines no targets", project.name))
            })?,
        };
        self.inner.runner.loader().validate_target(config)?;
        let target = config.name.clone();

        let build = {
            let mut state = self.inner.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;

            let build = BuildResult::new(id, project, target);
            state.builds.insert(id, build.clone());
            state.pending.push_back(id);
            build
        };

        info!(
            "Queued build {} for target '{}' of project '{}'",
            build.id, build.target, build.project_name
        );
        build.log.info("Build queued");
        self.inner.work_available.notify_one();
        Ok(build)
    }

    /// Cancel a queued or running build
    ///
    /// A queued build is removed and marked Cancelled. A running build is
    /// flagged and stops at its next stage or step boundary. Finished builds
    /// are returned unchanged.
    pub async fn cancel_build(&self, id: u64) -> Result<BuildResult> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let build = state.builds.get_mut(&id).ok_or(Error::BuildNotFound(id))?;

        if build.status.is_terminal() {
            return Ok(build.clone());
        }

        if let Some(active) = state.active.as_ref().filter(|active| active.id == id) {
            info!("Cancellation requested for running build {}", id);
            build.log.info("Cancellation requested");
            active.cancel.cancel();
            return Ok(build.clone());
        }

        state.pending.retain(|pending| *pending != id);
        build.status = BuildStatus::Cancelled;
        build.finished_at = Some(Utc::now());
        build.log.info("Build cancelled before it started");
        info!("Cancelled queued build {}", id);
        let snapshot = build.clone();
        drop(guard);

        self.inner.build_finished.notify_waiters();
        Ok(snapshot)
    }

    pub async fn get_build_result(&self, id: u64) -> Result<BuildResult> {
        let state = self.inner.state.lock().await;
        state.builds.get(&id).cloned().ok_or(Error::BuildNotFound(id))
    }

    /// Every build known to this agent, oldest first
    pub async fn get_all_build_results(&self) -> Vec<BuildResult> {
        let state = self.inner.state.lock().await;
        state.builds.values().cloned().collect()
    }

    pub async fn summary(&self) -> QueueSummary {
        let state = self.inner.state.lock().await;
        QueueSummary::from_results(state.builds.values())
    }

    /// Id of the build the worker is running
    pub async fn active_build(&self) -> Option<u64> {
        let state = self.inner.state.lock().await;
        state.active.as_ref().map(|active| active.id)
    }

    /// Wait until a build reaches a terminal status
    pub async fn wait_for(&self, id: u64) -> Result<BuildResult> {
        loop {
            let finished = self.inner.build_finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            let build = self.get_build_result(id).await?;
            if build.status.is_terminal() {
                return Ok(build);
            }
            finished.await;
        }
    }
}

impl QueueInner {
    async fn work(self: Arc<Self>, builds_dir: PathBuf) {
        loop {
            let Some(job) = self.take_next().await else {
                self.work_available.notified().await;
                continue;
            };

            let id = job.id;
            let log = job.log.clone();
            let runner = Arc::clone(&self.runner);
            let builds_dir = builds_dir.clone();

            // Steps that panic are contained by the runner; this catches the rest
            let outcome = tokio::spawn(run_build(runner, builds_dir, job)).await;

            let mut state = self.state.lock().await;
            state.active = None;
            if let Some(build) = state.builds.get_mut(&id) {
                build.finished_at = Some(Utc::now());
                match outcome {
                    Ok(Some(results)) => {
                        build.status = if results.cancelled {
                            BuildStatus::Cancelled
                        } else if results.is_success() {
                            BuildStatus::Complete
                        } else {
                            BuildStatus::Failed
                        };
                        build.results = Some(results);
                    }
                    Ok(None) => {
                        build.status = BuildStatus::Failed;
                        build.error = Some(format!(
                            "Target '{}' is missing from project '{}'",
                            build.target, build.project_name
                        ));
                    }
                    Err(e) => {
                        error!("Build {} crashed: {}", id, e);
                        build.status = BuildStatus::Failed;
                        build.error = Some(format!("Build task crashed: {}", e));
                    }
                }
                log.info(format!("Build finished: {:?}", build.status));
                info!("Build {} finished: {:?}", id, build.status);
            } else {
                warn!("Finished build {} is no longer tracked", id);
            }
            drop(state);

            self.build_finished.notify_waiters();
        }
    }

    /// Pop the head of the queue and mark it active
    async fn take_next(&self) -> Option<BuildJob> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        while let Some(id) = state.pending.pop_front() {
            let Some(build) = state.builds.get_mut(&id) else {
                continue;
            };

            let cancel = CancellationFlag::new();
            build.started_at = Some(Utc::now());
            build.log.info("Build started");
            state.active = Some(ActiveBuild {
                id,
                cancel: cancel.clone(),
            });

            return Some(BuildJob {
                id,
                project: Arc::clone(&build.project),
                target: build.target.clone(),
                log: build.log.clone(),
                cancel,
            });
        }
        None
    }
}

/// Run the build's target; `None` when the project no longer has it
async fn run_build(
    runner: Arc<PipelineRunner>,
    builds_dir: PathBuf,
    job: BuildJob,
) -> Option<PipelineResults> {
    let Some(target) = job.project.target(&job.target) else {
        warn!("Build {}: target '{}' disappeared from the project", job.id, job.target);
        return None;
    };

    let workspace = Workspace::new(&builds_dir, job.id, &job.project.name, &job.target);
    Some(runner.run(target, &workspace, &job.log, &job.cancel).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BuildTargetConfig, StageKind};
    use crate::modules::testing::{test_registry, FakeConfig, OtherConfig};
    use crate::modules::ModuleLoader;

    fn queue() -> BuildQueue {
        let loader = Arc::new(ModuleLoader::new(Arc::new(test_registry())));
        BuildQueue::new(Arc::new(PipelineRunner::new(loader)))
    }

    fn project() -> Arc<ProjectConfig> {
        let release = BuildTargetConfig::new("Release")
            .with_step(StageKind::Build, Arc::new(FakeConfig::named("Fake")));
        Arc::new(ProjectConfig::new("Demo", vec![release]).unwrap())
    }

    #[tokio::test]
    async fn test_enqueue_without_worker_stays_queued() {
        let queue = queue();
        let build = queue.enqueue_build(project(), Some("Release")).await.unwrap();
        assert_eq!(build.id, 1);
        assert_eq!(build.status, BuildStatus::Queued);
        assert!(queue.active_build().await.is_none());
        assert_eq!(queue.summary().await.queued, 1);
    }

    #[tokio::test]
    async fn test_unknown_target_is_rejected() {
        let queue = queue();
        let err = queue.enqueue_build(project(), Some("Debug")).await.unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
        assert!(queue.get_all_build_results().await.is_empty());
    }

    #[tokio::test]
    async fn test_default_build_checks_only_the_first_target() {
        let release = BuildTargetConfig::new("Release")
            .with_step(StageKind::Build, Arc::new(FakeConfig::named("Fake")));
        let debug = BuildTargetConfig::new("Debug")
            .with_step(
                StageKind::Build,
                Arc::new(OtherConfig {
                    name: "Missing".to_string(),
                }),
            );
        let project = Arc::new(ProjectConfig::new("Demo", vec![release, debug]).unwrap());
        let queue = queue();

        let build = queue.enqueue_build(Arc::clone(&project), None).await.unwrap();
        assert_eq!(build.target, "Release");

        let err = queue.enqueue_build(project, Some("Debug")).await.unwrap_err();
        assert!(matches!(err, Error::ModuleLoad { .. }));
        assert_eq!(queue.get_all_build_results().await.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_runs_build() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue();
        queue
            .start_queue(&AgentFilesystem::new(dir.path()))
            .await
            .unwrap();

        let build = queue.enqueue_build(project(), None).await.unwrap();
        assert_eq!(build.target, "Release");
        let finished = queue.wait_for(build.id).await.unwrap();
        assert_eq!(finished.status, BuildStatus::Complete);
        assert_eq!(finished.results.unwrap().target, "Release");
        assert!(finished.started_at.is_some());
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue();
        let fs = AgentFilesystem::new(dir.path());
        queue.start_queue(&fs).await.unwrap();
        assert!(matches!(
            queue.start_queue(&fs).await,
            Err(Error::QueueAlreadyStarted)
        ));
    }
}
