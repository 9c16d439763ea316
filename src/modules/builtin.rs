//! Modules compiled into the agent
//!
//! - `Local` (source): copies a directory on the agent into the working copy
//! - `Shell` (build): runs a shell command inside the working copy
//! - `Log` (notify): writes a summary of the distribution to the build log

use crate::core::{
    downcast_config, sync_working_copy, Build, BuildOutput, DistributeOutput, Notify,
    NotifyOutput, PipelineStep, SequenceResults, Source, SourceControl, SourceOutput, StepConfig,
    StepError, StepLogger, StepResults, Workspace,
};
use crate::error::Result;
use crate::modules::{ModuleRegistry, NativeModule};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

/// Register every compiled-in module
pub fn register_builtin_modules(registry: &mut ModuleRegistry) -> Result<()> {
    registry.register_module::<Source>(Arc::new(
        NativeModule::<Source, LocalSourceConfig, LocalSourceStep>::new("Local directory", "Local"),
    ))?;
    registry.register_module::<Build>(Arc::new(
        NativeModule::<Build, ShellConfig, ShellStep>::new("Shell command", "Shell"),
    ))?;
    registry.register_module::<Notify>(Arc::new(
        NativeModule::<Notify, LogNotifyConfig, LogNotifyStep>::new("Build log", "Log"),
    ))?;
    Ok(())
}

fn default_timeout_secs() -> u64 {
    3600
}

// ---------------------------------------------------------------------------
// Local source

#[derive(Debug, Clone, Deserialize)]
pub struct LocalSourceConfig {
    pub name: String,

    /// Directory copied into the working copy
    pub path: PathBuf,
}

impl StepConfig for LocalSourceConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct LocalSourceStep {
    config: Option<LocalSourceConfig>,
    logger: Option<StepLogger>,
}

#[async_trait]
impl PipelineStep<Source> for LocalSourceStep {
    fn initialize(
        &mut self,
        config: Arc<dyn StepConfig>,
        _workspace: &Workspace,
        logger: StepLogger,
    ) -> anyhow::Result<()> {
        let config = downcast_config::<LocalSourceConfig>(config.as_ref())
            .context("expected a Local source configuration")?;
        if config.path.as_os_str().is_empty() {
            anyhow::bail!("'path' must not be empty");
        }
        self.config = Some(config.clone());
        self.logger = Some(logger);
        Ok(())
    }

    async fn execute_step(
        &mut self,
        _input: &(),
        workspace: &Workspace,
    ) -> anyhow::Result<StepResults<SourceOutput>> {
        let logger = self.logger.clone().context("step not initialized")?;
        let name = self.config.as_ref().context("step not initialized")?.name.clone();
        Ok(sync_working_copy(self, &name, workspace, &logger).await)
    }
}

impl LocalSourceStep {
    async fn copy_in(&self, workspace: &Workspace) -> anyhow::Result<()> {
        let config = self.config.as_ref().context("step not initialized")?;
        let from = config.path.clone();
        let to = workspace.source_dir();
        tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .context("copy task failed")??;
        Ok(())
    }
}

#[async_trait]
impl SourceControl for LocalSourceStep {
    fn is_working_copy_initialized(&self, workspace: &Workspace) -> bool {
        std::fs::read_dir(workspace.source_dir())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    async fn current_commit(&self, _workspace: &Workspace) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn download(&mut self, workspace: &Workspace) -> anyhow::Result<()> {
        self.copy_in(workspace).await
    }

    async fn update(&mut self, workspace: &Workspace) -> anyhow::Result<()> {
        self.copy_in(workspace).await
    }
}

fn copy_tree(from: &Path, to: &Path) -> anyhow::Result<()> {
    if !from.is_dir() {
        anyhow::bail!("{} is not a directory", from.display());
    }
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {}", entry.path().display()))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shell build

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    pub name: String,

    pub command: String,

    /// Relative to the working copy
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl StepConfig for ShellConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct ShellStep {
    config: Option<ShellConfig>,
    logger: Option<StepLogger>,
}

#[async_trait]
impl PipelineStep<Build> for ShellStep {
    fn initialize(
        &mut self,
        config: Arc<dyn StepConfig>,
        _workspace: &Workspace,
        logger: StepLogger,
    ) -> anyhow::Result<()> {
        let config = downcast_config::<ShellConfig>(config.as_ref())
            .context("expected a Shell configuration")?;
        if config.command.trim().is_empty() {
            anyhow::bail!("'command' must not be empty");
        }
        self.config = Some(config.clone());
        self.logger = Some(logger);
        Ok(())
    }

    async fn execute_step(
        &mut self,
        _input: &SequenceResults<SourceOutput>,
        workspace: &Workspace,
    ) -> anyhow::Result<StepResults<BuildOutput>> {
        let (Some(config), Some(logger)) = (&self.config, &self.logger) else {
            anyhow::bail!("step not initialized");
        };

        let cwd = match &config.working_directory {
            Some(dir) => workspace.source_dir().join(dir),
            None => workspace.source_dir(),
        };
        logger.info(format!("$ {}", config.command));

        let mut child = match shell_command(&config.command)
            .current_dir(&cwd)
            .envs(&config.environment)
            .env("FORGELINE_PROJECT", &workspace.project)
            .env("FORGELINE_TARGET", &workspace.target)
            .env("FORGELINE_BUILD_ID", workspace.build_id.to_string())
            .env("FORGELINE_WORKSPACE", &workspace.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                logger.error(format!("Failed to start command in {}: {}", cwd.display(), e));
                return Ok(StepResults::failure(
                    &config.name,
                    StepError::new("SpawnFailed", e.to_string()),
                ));
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                forward_lines(stdout, logger, false),
                forward_lines(stderr, logger, true),
            );
            status
        };

        let status = match timeout(Duration::from_secs(config.timeout_secs), run).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Ok(StepResults::failure(
                    &config.name,
                    StepError::new("ProcessError", e.to_string()),
                ))
            }
            Err(_) => {
                logger.error(format!("Command timed out after {}s", config.timeout_secs));
                return Ok(StepResults::failure(
                    &config.name,
                    StepError::new(
                        "Timeout",
                        format!("timed out after {} seconds", config.timeout_secs),
                    ),
                ));
            }
        };

        let exit_code = status.code();
        if status.success() {
            Ok(StepResults::success(&config.name, BuildOutput { exit_code }))
        } else {
            let code = exit_code.unwrap_or(-1);
            logger.error(format!("Command exited with code {}", code));
            let mut result = StepResults::failure(
                &config.name,
                StepError::new("NonZeroExit", format!("command exited with code {}", code)),
            );
            result.output = BuildOutput { exit_code };
            Ok(result)
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: Option<R>, logger: &StepLogger, is_stderr: bool) {
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            logger.warn(line);
        } else {
            logger.info(line);
        }
    }
}

// ---------------------------------------------------------------------------
// Log notify

#[derive(Debug, Clone, Deserialize)]
pub struct LogNotifyConfig {
    pub name: String,

    /// Extra line written before the summary
    #[serde(default)]
    pub message: Option<String>,
}

impl StepConfig for LogNotifyConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct LogNotifyStep {
    config: Option<LogNotifyConfig>,
    logger: Option<StepLogger>,
}

#[async_trait]
impl PipelineStep<Notify> for LogNotifyStep {
    fn initialize(
        &mut self,
        config: Arc<dyn StepConfig>,
        _workspace: &Workspace,
        logger: StepLogger,
    ) -> anyhow::Result<()> {
        let config = downcast_config::<LogNotifyConfig>(config.as_ref())
            .context("expected a Log notify configuration")?;
        self.config = Some(config.clone());
        self.logger = Some(logger);
        Ok(())
    }

    async fn execute_step(
        &mut self,
        input: &SequenceResults<DistributeOutput>,
        workspace: &Workspace,
    ) -> anyhow::Result<StepResults<NotifyOutput>> {
        let (Some(config), Some(logger)) = (&self.config, &self.logger) else {
            anyhow::bail!("step not initialized");
        };

        if let Some(message) = &config.message {
            logger.info(message.clone());
        }

        let subject = format!("{}/{} (build {})", workspace.project, workspace.target, workspace.build_id);
        if input.is_success {
            let locations: Vec<&str> = input
                .outputs()
                .filter_map(|output| output.location.as_deref())
                .collect();
            if locations.is_empty() {
                logger.info(format!("{} succeeded", subject));
            } else {
                logger.info(format!("{} succeeded, distributed to {}", subject, locations.join(", ")));
            }
        } else {
            let reason = input
                .failure_reason()
                .unwrap_or_else(|| "unknown error".to_string());
            logger.error(format!("{} failed: {}", subject, reason));
        }

        Ok(StepResults::success(
            &config.name,
            NotifyOutput {
                delivered_to: Some("build log".to_string()),
            },
        ))
    }
}
