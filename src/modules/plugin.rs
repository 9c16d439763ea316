//! External plugin binaries
//!
//! A plugin is an executable in the plugin directory. It is driven through two
//! subcommands:
//!
//! - `<binary> describe` prints a JSON [`PluginManifest`] listing the modules
//!   it provides.
//! - `<binary> execute <stage>` reads a JSON request `{config, workspace, input}`
//!   on stdin, writes log lines to stderr and prints a JSON reply
//!   `{success, error, output}` as the last line of stdout.

use crate::core::{
    downcast_config, ConfigType, PipelineStep, Stage, StageKind, StepConfig, StepError,
    StepLogger, StepResults, Workspace,
};
use crate::error::{Error, Result};
use crate::modules::{AnyModule, Module};
use crate::modules::loader::PluginSettings;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Output of `<binary> describe`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub modules: Vec<PluginModuleDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginModuleDescriptor {
    /// Display name
    pub name: String,

    pub category: StageKind,

    /// Tag of the step objects this module accepts
    pub config_name: String,
}

/// Reply printed by `<binary> execute`
#[derive(Debug, Deserialize)]
struct PluginReply<O> {
    success: bool,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    output: Option<O>,
}

/// A plugin executable on disk
#[derive(Debug, Clone)]
pub struct PluginBinary {
    path: PathBuf,
    settings: PluginSettings,
}

impl PluginBinary {
    pub fn new(path: impl Into<PathBuf>, settings: PluginSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used in external configuration types
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Run `describe` and parse the manifest
    pub async fn describe(&self) -> Result<PluginManifest> {
        let output = timeout(
            Duration::from_secs(self.settings.describe_timeout_secs),
            Command::new(&self.path)
                .arg("describe")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| self.load_error(format!(
            "describe timed out after {}s",
            self.settings.describe_timeout_secs
        )))?
        .map_err(|e| self.load_error(format!("failed to run: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.load_error(format!(
                "describe exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| self.load_error(format!("invalid manifest: {}", e)))
    }

    /// Run `execute <stage>` and return the reply line
    ///
    /// Everything the plugin writes to stderr is forwarded to `logger`.
    pub async fn execute(
        &self,
        stage: StageKind,
        request: &serde_json::Value,
        logger: &StepLogger,
    ) -> std::result::Result<String, StepError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| StepError::new("InvalidRequest", e.to_string()))?;

        debug!("Executing plugin {} for {} stage", self.path.display(), stage);

        let mut child = Command::new(&self.path)
            .args(["execute", stage.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StepError::new("PluginSpawnFailed", format!("{}: {}", self.path.display(), e)))?;

        // The request is written while the output pipes drain
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let run = async move {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            if let Err(e) = fed {
                // A plugin may exit without reading its request
                debug!("Plugin stdin closed early: {}", e);
            }
            output
        };

        let output = timeout(Duration::from_secs(self.settings.execute_timeout_secs), run)
            .await
            .map_err(|_| {
                StepError::new(
                    "PluginTimeout",
                    format!("no reply after {}s", self.settings.execute_timeout_secs),
                )
            })?
            .map_err(|e| StepError::new("PluginIoError", e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            logger.info(line);
        }

        if !output.status.success() {
            return Err(StepError::new(
                "PluginExit",
                format!(
                    "plugin exited with code {}",
                    output.status.code().unwrap_or(-1)
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| StepError::new("InvalidReply", "plugin printed no reply"))
    }

    fn load_error(&self, reason: String) -> Error {
        Error::PluginLoad {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Step configuration owned by a plugin: the raw tagged object
#[derive(Debug, Clone)]
pub struct ExternalStepConfig {
    tag: String,
    config_type: ConfigType,
    pub value: serde_json::Value,
}

impl StepConfig for ExternalStepConfig {
    fn name(&self) -> &str {
        &self.tag
    }

    fn config_type(&self) -> ConfigType {
        self.config_type.clone()
    }
}

/// A module served by a plugin binary
pub struct PluginModule<S> {
    binary: Arc<PluginBinary>,
    name: String,
    config_name: String,
    config_type: ConfigType,
    _stage: PhantomData<fn() -> S>,
}

impl<S> PluginModule<S> {
    pub fn new(binary: Arc<PluginBinary>, descriptor: &PluginModuleDescriptor) -> Self {
        let config_type = ConfigType::external(&binary.file_name(), &descriptor.config_name);
        Self {
            binary,
            name: descriptor.name.clone(),
            config_name: descriptor.config_name.clone(),
            config_type,
            _stage: PhantomData,
        }
    }
}

/// Wrap a described module into the stage it declares
pub fn plugin_module(binary: Arc<PluginBinary>, descriptor: &PluginModuleDescriptor) -> AnyModule {
    match descriptor.category {
        StageKind::Source => AnyModule::Source(Arc::new(PluginModule::new(binary, descriptor))),
        StageKind::Build => AnyModule::Build(Arc::new(PluginModule::new(binary, descriptor))),
        StageKind::Archive => AnyModule::Archive(Arc::new(PluginModule::new(binary, descriptor))),
        StageKind::Distribute => {
            AnyModule::Distribute(Arc::new(PluginModule::new(binary, descriptor)))
        }
        StageKind::Notify => AnyModule::Notify(Arc::new(PluginModule::new(binary, descriptor))),
    }
}

impl<S: Stage> Module<S> for PluginModule<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> &str {
        "PluginStep"
    }

    fn step_config_name(&self) -> &str {
        &self.config_name
    }

    fn step_config_type(&self) -> ConfigType {
        self.config_type.clone()
    }

    fn deserialize_config(&self, value: serde_json::Value) -> Result<Arc<dyn StepConfig>> {
        if !value.is_object() {
            return Err(Error::ConfigValidation(format!(
                "Invalid '{}' step: expected an object",
                self.config_name
            )));
        }
        Ok(Arc::new(ExternalStepConfig {
            tag: self.config_name.clone(),
            config_type: self.config_type.clone(),
            value,
        }))
    }

    fn create_step(&self) -> Box<dyn PipelineStep<S>> {
        Box::new(PluginStep::<S> {
            binary: Arc::clone(&self.binary),
            config: None,
            logger: None,
            _stage: PhantomData,
        })
    }
}

/// Step that delegates to `<binary> execute <stage>`
pub struct PluginStep<S> {
    binary: Arc<PluginBinary>,
    config: Option<ExternalStepConfig>,
    logger: Option<StepLogger>,
    _stage: PhantomData<fn() -> S>,
}

#[async_trait]
impl<S: Stage> PipelineStep<S> for PluginStep<S> {
    fn initialize(
        &mut self,
        config: Arc<dyn StepConfig>,
        _workspace: &Workspace,
        logger: StepLogger,
    ) -> anyhow::Result<()> {
        let config = downcast_config::<ExternalStepConfig>(config.as_ref())
            .ok_or_else(|| anyhow::anyhow!("{} is not a plugin configuration", config.name()))?;
        self.config = Some(config.clone());
        self.logger = Some(logger);
        Ok(())
    }

    async fn execute_step(
        &mut self,
        input: &S::Input,
        workspace: &Workspace,
    ) -> anyhow::Result<StepResults<S::Output>> {
        let (Some(config), Some(logger)) = (&self.config, &self.logger) else {
            anyhow::bail!("plugin step executed before initialization");
        };

        let request = serde_json::json!({
            "config": config.value,
            "workspace": workspace,
            "input": serde_json::to_value(input)?,
        });

        let reply = match self.binary.execute(S::KIND, &request, logger).await {
            Ok(reply) => reply,
            Err(error) => {
                logger.error(error.to_string());
                return Ok(StepResults::failure(config.name(), error));
            }
        };

        Ok(parse_reply::<S::Output>(config.name(), &reply))
    }
}

fn parse_reply<O: DeserializeOwned + Default>(step_name: &str, reply: &str) -> StepResults<O> {
    match serde_json::from_str::<PluginReply<O>>(reply) {
        Ok(PluginReply {
            success: true,
            output,
            ..
        }) => StepResults::success(step_name, output.unwrap_or_default()),
        Ok(PluginReply { error, .. }) => StepResults::failure(
            step_name,
            StepError::new(
                "PluginStepFailed",
                error.unwrap_or_else(|| "plugin reported failure".to_string()),
            ),
        ),
        Err(e) => StepResults::failure(
            step_name,
            StepError::new("InvalidReply", format!("{}: {}", e, reply.trim())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArchiveOutput, Build, BuildOutput};

    fn descriptor(category: StageKind) -> PluginModuleDescriptor {
        PluginModuleDescriptor {
            name: "Steam uploader".to_string(),
            category,
            config_name: "Steam".to_string(),
        }
    }

    #[test]
    fn test_manifest_parses() {
        let manifest: PluginManifest = serde_json::from_str(
            r#"{"modules":[{"name":"Zip","category":"archive","config_name":"Zip"}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.modules.len(), 1);
        assert_eq!(manifest.modules[0].category, StageKind::Archive);
    }

    #[test]
    fn test_plugin_module_lands_in_declared_stage() {
        let binary = Arc::new(PluginBinary::new("/opt/plugins/steam", PluginSettings::default()));
        let module = plugin_module(binary, &descriptor(StageKind::Distribute));
        assert_eq!(module.stage(), StageKind::Distribute);
        assert_eq!(module.info().config_type, "plugin:steam/Steam");
    }

    #[test]
    fn test_external_config_keeps_raw_value() {
        let binary = Arc::new(PluginBinary::new("/opt/plugins/steam", PluginSettings::default()));
        let module: PluginModule<Build> = PluginModule::new(binary, &descriptor(StageKind::Build));
        let config = module
            .deserialize_config(serde_json::json!({"name": "Steam", "app_id": 480}))
            .unwrap();
        assert_eq!(config.name(), "Steam");
        assert_eq!(config.config_type(), module.step_config_type());

        let external = downcast_config::<ExternalStepConfig>(config.as_ref()).unwrap();
        assert_eq!(external.value["app_id"], 480);
    }

    #[test]
    fn test_parse_reply() {
        let ok: StepResults<ArchiveOutput> =
            parse_reply("Zip", r#"{"success":true,"output":{"archive_file":"demo.zip"}}"#);
        assert!(ok.is_success);
        assert_eq!(ok.output.archive_file.as_deref(), Some("demo.zip"));

        let failed: StepResults<BuildOutput> =
            parse_reply("Zip", r#"{"success":false,"error":"disk full"}"#);
        assert!(!failed.is_success);
        assert_eq!(failed.error.unwrap().message, "disk full");

        let garbage: StepResults<BuildOutput> = parse_reply("Zip", "not json");
        assert_eq!(garbage.error.unwrap().kind, "InvalidReply");
    }
}
