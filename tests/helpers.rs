//! Test utility functions for forgeline
#![allow(dead_code)]

use async_trait::async_trait;
use forgeline::agent::{AgentFilesystem, BuildQueue};
use forgeline::core::{
    downcast_config, Archive, Build, BuildLog, Distribute, Notify, PipelineResults,
    PipelineStep, ProjectConfig, SequenceResults, Source, Stage, StageKind, StepConfig,
    StepError, StepLogger, StepResults, Workspace,
};
use forgeline::execution::{CancellationFlag, PipelineRunner};
use forgeline::modules::{
    register_builtin_modules, Module, ModuleLoader, ModuleRegistry, NativeModule,
};
use serde::Deserialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Step configuration whose behavior is scripted by the test document
///
/// ```yaml
/// - name: Scripted
///   label: compile
///   fail: false       # return a failed result
///   raise: false      # return Err from execute_step
///   panic: false      # panic inside execute_step
///   sleep_ms: 0       # sleep before finishing
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedConfig {
    pub name: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub fail: bool,

    #[serde(default)]
    pub raise: bool,

    #[serde(default)]
    pub panic: bool,

    #[serde(default)]
    pub sleep_ms: u64,
}

impl StepConfig for ScriptedConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

pub struct ScriptedStep<S> {
    config: Option<ScriptedConfig>,
    logger: Option<StepLogger>,
    _stage: PhantomData<fn() -> S>,
}

impl<S> Default for ScriptedStep<S> {
    fn default() -> Self {
        Self {
            config: None,
            logger: None,
            _stage: PhantomData,
        }
    }
}

#[async_trait]
impl<S: Stage> PipelineStep<S> for ScriptedStep<S> {
    fn initialize(
        &mut self,
        config: Arc<dyn StepConfig>,
        _workspace: &Workspace,
        logger: StepLogger,
    ) -> anyhow::Result<()> {
        let config = downcast_config::<ScriptedConfig>(config.as_ref())
            .ok_or_else(|| anyhow::anyhow!("expected a ScriptedConfig"))?;
        self.config = Some(config.clone());
        self.logger = Some(logger);
        Ok(())
    }

    async fn execute_step(
        &mut self,
        _input: &S::Input,
        _workspace: &Workspace,
    ) -> anyhow::Result<StepResults<S::Output>> {
        let config = self.config.clone().expect("initialized");
        let logger = self.logger.clone().expect("initialized");
        let label = config.label.clone().unwrap_or_else(|| config.name.clone());

        logger.info(format!("executed {}", label));

        if config.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.sleep_ms)).await;
        }
        if config.panic {
            panic!("scripted panic in {}", label);
        }
        if config.raise {
            anyhow::bail!("scripted error in {}", label);
        }
        if config.fail {
            return Ok(StepResults::failure(
                &config.name,
                StepError::new("ScriptedFailure", format!("{} was told to fail", label)),
            ));
        }
        Ok(StepResults::success(&config.name, S::Output::default()))
    }
}

fn scripted<S: Stage>() -> Arc<dyn Module<S>> {
    Arc::new(NativeModule::<S, ScriptedConfig, ScriptedStep<S>>::new("Scripted step", "Scripted"))
}

/// Built-in modules plus the scripted module in every stage
pub fn scripted_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    register_builtin_modules(&mut registry).unwrap();
    registry.register_module(scripted::<Source>()).unwrap();
    registry.register_module(scripted::<Build>()).unwrap();
    registry.register_module(scripted::<Archive>()).unwrap();
    registry.register_module(scripted::<Distribute>()).unwrap();
    registry.register_module(scripted::<Notify>()).unwrap();
    registry
}

pub fn parse_project(yaml: &str, registry: &ModuleRegistry) -> Arc<ProjectConfig> {
    let discriminators = registry.type_discriminators().unwrap();
    Arc::new(ProjectConfig::from_yaml(yaml, &discriminators).unwrap())
}

pub fn runner(registry: ModuleRegistry) -> PipelineRunner {
    PipelineRunner::new(Arc::new(ModuleLoader::new(Arc::new(registry))))
}

/// Result of running one target directly through the runner
pub struct TargetRun {
    pub results: PipelineResults,
    pub log: BuildLog,
    _dir: tempfile::TempDir,
}

impl TargetRun {
    /// Labels of the scripted steps that ran, in order
    pub fn executed(&self) -> Vec<String> {
        executed_labels(&self.log)
    }
}

pub async fn run_target(yaml: &str, target: &str) -> TargetRun {
    let registry = scripted_registry();
    let project = parse_project(yaml, &registry);
    let runner = runner(registry);

    let dir = tempfile::tempdir().unwrap();
    let ws = Workspace::new(dir.path(), 1, &project.name, target);
    let log = BuildLog::new(1);
    let config = project.target(target).expect("target exists");
    let results = runner.run(config, &ws, &log, &CancellationFlag::new()).await;

    TargetRun {
        results,
        log,
        _dir: dir,
    }
}

pub fn executed_labels(log: &BuildLog) -> Vec<String> {
    log.lines()
        .into_iter()
        .filter_map(|line| line.message.strip_prefix("executed ").map(str::to_string))
        .collect()
}

/// A queue with a running worker over a scratch base directory
pub async fn started_queue(registry: ModuleRegistry) -> (BuildQueue, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let queue = BuildQueue::new(Arc::new(runner(registry)));
    queue
        .start_queue(&AgentFilesystem::new(dir.path()))
        .await
        .unwrap();
    (queue, dir)
}

/// Poll until the worker picks up `id`
pub async fn wait_until_active(queue: &BuildQueue, id: u64) {
    for _ in 0..500 {
        if queue.active_build().await == Some(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("build {} never became active", id);
}

/// Poll until a scripted step labelled `label` has started in build `id`
pub async fn wait_until_executed(queue: &BuildQueue, id: u64, label: &str) {
    for _ in 0..500 {
        let build = queue.get_build_result(id).await.unwrap();
        if executed_labels(&build.log).iter().any(|seen| seen == label) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("step {} of build {} never ran", label, id);
}

pub fn assert_skipped_ok<O>(sequence: &SequenceResults<O>) {
    assert!(
        sequence.is_skipped && sequence.is_success,
        "{} stage should be skipped and successful: {:?}",
        sequence.stage,
        sequence.error
    );
}

pub fn assert_skipped_failed<O>(sequence: &SequenceResults<O>) {
    assert!(
        sequence.is_skipped && !sequence.is_success,
        "{} stage should be skipped and failed",
        sequence.stage
    );
}

pub fn assert_ran<O>(sequence: &SequenceResults<O>, success: bool) {
    assert!(!sequence.is_skipped, "{} stage should have run", sequence.stage);
    assert_eq!(
        sequence.is_success, success,
        "{} stage success mismatch: {:?}",
        sequence.stage, sequence.error
    );
}

pub fn stage_of<O>(sequence: &SequenceResults<O>) -> StageKind {
    sequence.stage
}
