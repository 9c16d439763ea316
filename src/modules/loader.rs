//! Module loading and step instantiation

use crate::core::{BuildTargetConfig, PipelineStep, StageKind, StepConfig, StepLogger, Workspace};
use crate::error::{Error, Result};
use crate::modules::plugin::{plugin_module, PluginBinary};
use crate::modules::{ModuleInfo, ModuleRegistry, RegisteredStage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Timeouts applied to plugin binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Limit for `<binary> describe`
    pub describe_timeout_secs: u64,

    /// Limit for one `<binary> execute` call
    pub execute_timeout_secs: u64,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            describe_timeout_secs: 10,
            execute_timeout_secs: 3600,
        }
    }
}

/// What a plugin directory scan produced
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadReport {
    /// Modules registered from plugins
    pub loaded: Vec<ModuleInfo>,

    /// Binaries that could not be used at all
    pub skipped: Vec<(PathBuf, String)>,

    /// Single modules refused because their tag or type was already taken
    pub rejected: Vec<(ModuleInfo, String)>,
}

/// Turns step configurations into initialized steps
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    registry: Arc<ModuleRegistry>,
}

impl ModuleLoader {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Scan `directory` for plugin binaries and register the modules they describe
    ///
    /// Only a missing directory is an error. Binaries that cannot be described
    /// are skipped; modules whose tag is already taken in their stage are rejected
    /// individually.
    pub async fn load_all(
        registry: &mut ModuleRegistry,
        directory: &Path,
        settings: &PluginSettings,
    ) -> Result<LoadReport> {
        if !directory.is_dir() {
            return Err(Error::DirectoryNotFound(directory.to_path_buf()));
        }

        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_plugin_binary(&path) {
                candidates.push(path);
            } else {
                debug!("Ignoring {} in plugin directory", path.display());
            }
        }
        candidates.sort();

        let mut report = LoadReport::default();
        for path in candidates {
            let binary = Arc::new(PluginBinary::new(path.clone(), *settings));
            let manifest = match binary.describe().await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Skipping plugin {}: {}", path.display(), e);
                    report.skipped.push((path, e.to_string()));
                    continue;
                }
            };

            if manifest.modules.is_empty() {
                warn!("Skipping plugin {}: it provides no modules", path.display());
                report
                    .skipped
                    .push((path, "plugin provides no modules".to_string()));
                continue;
            }

            for descriptor in &manifest.modules {
                let module = plugin_module(Arc::clone(&binary), descriptor);
                let info = module.info();

                if registry.has_discriminator(info.stage, &info.config_name) {
                    let reason = format!(
                        "step config name '{}' is already used by another {} module",
                        info.config_name, info.stage
                    );
                    warn!("Rejecting module '{}' from {}: {}", info.name, path.display(), reason);
                    report.rejected.push((info, reason));
                    continue;
                }

                match registry.register(module) {
                    Ok(()) => {
                        info!(
                            "Loaded {} module '{}' from {}",
                            info.stage,
                            info.name,
                            path.display()
                        );
                        report.loaded.push(info);
                    }
                    Err(e) => {
                        warn!("Rejecting module '{}' from {}: {}", info.name, path.display(), e);
                        report.rejected.push((info, e.to_string()));
                    }
                }
            }
        }

        Ok(report)
    }

    /// Create and initialize the step for `config` in stage `S`
    pub fn create_pipeline_step<S: RegisteredStage>(
        &self,
        config: Arc<dyn StepConfig>,
        workspace: &Workspace,
        logger: StepLogger,
    ) -> Result<Box<dyn PipelineStep<S>>> {
        let config_type = config.config_type();
        let module = self
            .registry
            .modules::<S>()
            .iter()
            .find(|module| module.step_config_type() == config_type);

        let Some(module) = module else {
            return Err(self.unresolved(S::KIND, config.as_ref()));
        };

        debug!("Creating {} step '{}' from module '{}'", S::KIND, config.name(), module.name());
        let mut step = module.create_step();
        step.initialize(config, workspace, logger)
            .map_err(|e| Error::StepInitialization {
                module: module.name().to_string(),
                message: format!("{:#}", e),
            })?;
        Ok(step)
    }

    /// Check that every step of a target resolves to a module of its own stage
    pub fn validate_target(&self, target: &BuildTargetConfig) -> Result<()> {
        for stage in StageKind::ALL {
            let modules = self.registry.modules_for_step_type(stage);
            for config in target.steps(stage) {
                let config_type = config.config_type().to_string();
                if !modules.iter().any(|info| info.config_type == config_type) {
                    return Err(self.unresolved(stage, config.as_ref()));
                }
            }
        }
        Ok(())
    }

    fn unresolved(&self, stage: StageKind, config: &dyn StepConfig) -> Error {
        match self.registry.find_by_config_type(&config.config_type()) {
            Some(info) => Error::StepTypeMismatch {
                module: info.name,
                expected: stage,
                actual: info.stage,
            },
            None => Error::ModuleLoad {
                stage,
                tag: config.name().to_string(),
            },
        }
    }
}

#[cfg(unix)]
fn is_plugin_binary(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_plugin_binary(path: &Path) -> bool {
    let executable = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "exe" | "bat" | "cmd"))
        .unwrap_or(false);
    executable && path.is_file()
}
