//! Project configuration documents
//!
//! A project document names the project and lists its build targets. Each
//! target carries five arrays of step objects, one per stage. A step object's
//! `name` field is the discriminator that selects the module (and therefore
//! the concrete configuration type) used to deserialize it:
//!
//! ```yaml
//! name: Demo
//! targets:
//!   - name: Release
//!     build:
//!       - name: Shell
//!         command: cargo build --release
//!     notify:
//!       - name: Log
//! ```

use crate::core::stage::StageKind;
use crate::error::{Error, Result};
use crate::modules::TypeDiscriminators;
use serde::Deserialize;
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Upcast helper so configuration trait objects can be downcast by their step
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Runtime identity of a configuration type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ConfigType(Cow<'static, str>);

impl ConfigType {
    /// Identity of a compiled-in configuration type
    pub fn of<T: ?Sized>() -> Self {
        ConfigType(Cow::Borrowed(std::any::type_name::<T>()))
    }

    /// Identity of a configuration owned by an external plugin binary
    pub fn external(plugin: &str, tag: &str) -> Self {
        ConfigType(Cow::Owned(format!("plugin:{}/{}", plugin, tag)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration of one step instance
pub trait StepConfig: AsAny + fmt::Debug + Send + Sync {
    /// Discriminator tag, equal to the serialized `name` field
    fn name(&self) -> &str;

    /// Runtime type used to find the module that owns this configuration
    fn config_type(&self) -> ConfigType {
        ConfigType::of::<Self>()
    }
}

/// Downcast a configuration to the concrete type a step expects
pub fn downcast_config<C: StepConfig + 'static>(config: &dyn StepConfig) -> Option<&C> {
    config.as_any().downcast_ref::<C>()
}

/// A named target: five ordered step lists
#[derive(Debug, Clone)]
pub struct BuildTargetConfig {
    pub name: String,
    pub source: Vec<Arc<dyn StepConfig>>,
    pub build: Vec<Arc<dyn StepConfig>>,
    pub archive: Vec<Arc<dyn StepConfig>>,
    pub distribute: Vec<Arc<dyn StepConfig>>,
    pub notify: Vec<Arc<dyn StepConfig>>,
}

impl BuildTargetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Vec::new(),
            build: Vec::new(),
            archive: Vec::new(),
            distribute: Vec::new(),
            notify: Vec::new(),
        }
    }

    /// Append a step to a stage
    pub fn with_step(mut self, stage: StageKind, config: Arc<dyn StepConfig>) -> Self {
        self.steps_mut(stage).push(config);
        self
    }

    /// Configured steps of a stage
    pub fn steps(&self, stage: StageKind) -> &[Arc<dyn StepConfig>] {
        match stage {
            StageKind::Source => &self.source,
            StageKind::Build => &self.build,
            StageKind::Archive => &self.archive,
            StageKind::Distribute => &self.distribute,
            StageKind::Notify => &self.notify,
        }
    }

    fn steps_mut(&mut self, stage: StageKind) -> &mut Vec<Arc<dyn StepConfig>> {
        match stage {
            StageKind::Source => &mut self.source,
            StageKind::Build => &mut self.build,
            StageKind::Archive => &mut self.archive,
            StageKind::Distribute => &mut self.distribute,
            StageKind::Notify => &mut self.notify,
        }
    }

    pub fn step_count(&self) -> usize {
        StageKind::ALL.iter().map(|kind| self.steps(*kind).len()).sum()
    }
}

/// A project: a name plus targets unique by name
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub name: String,
    targets: Vec<BuildTargetConfig>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, targets: Vec<BuildTargetConfig>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::ConfigValidation("Project name is empty".to_string()));
        }
        if targets.is_empty() {
            return Err(Error::ConfigValidation(format!(
                "Project '{}' defines no targets",
                name
            )));
        }

        let mut seen = HashSet::new();
        for target in &targets {
            if target.name.trim().is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "Project '{}' has a target without a name",
                    name
                )));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate target name: {}",
                    target.name
                )));
            }
        }

        Ok(Self { name, targets })
    }

    /// Load a project document from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P, discriminators: &TypeDiscriminators) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, discriminators)
    }

    /// Parse a project document; JSON documents are accepted too
    pub fn from_yaml(yaml: &str, discriminators: &TypeDiscriminators) -> Result<Self> {
        let raw: RawProjectConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::ConfigValidation(e.to_string()))?;
        raw.resolve(discriminators)
    }

    pub fn targets(&self) -> &[BuildTargetConfig] {
        &self.targets
    }

    /// Target built when a request names none: the first one in the document
    pub fn default_target(&self) -> Option<&BuildTargetConfig> {
        self.targets.first()
    }

    pub fn target(&self, name: &str) -> Option<&BuildTargetConfig> {
        self.targets.iter().find(|target| target.name == name)
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|target| target.name.as_str()).collect()
    }
}

/// Document shape before discriminators are applied
#[derive(Debug, Deserialize)]
struct RawProjectConfig {
    name: String,

    #[serde(default)]
    targets: Vec<RawTargetConfig>,
}

#[derive(Debug, Deserialize)]
struct RawTargetConfig {
    name: String,

    #[serde(default)]
    source: Vec<serde_json::Value>,

    #[serde(default)]
    build: Vec<serde_json::Value>,

    #[serde(default)]
    archive: Vec<serde_json::Value>,

    #[serde(default)]
    distribute: Vec<serde_json::Value>,

    #[serde(default)]
    notify: Vec<serde_json::Value>,
}

impl RawProjectConfig {
    fn resolve(self, discriminators: &TypeDiscriminators) -> Result<ProjectConfig> {
        let targets = self
            .targets
            .into_iter()
            .map(|target| target.resolve(discriminators))
            .collect::<Result<Vec<_>>>()?;
        ProjectConfig::new(self.name, targets)
    }
}

impl RawTargetConfig {
    fn resolve(self, discriminators: &TypeDiscriminators) -> Result<BuildTargetConfig> {
        let mut target = BuildTargetConfig::new(self.name);
        let lists = [
            (StageKind::Source, self.source),
            (StageKind::Build, self.build),
            (StageKind::Archive, self.archive),
            (StageKind::Distribute, self.distribute),
            (StageKind::Notify, self.notify),
        ];

        for (stage, entries) in lists {
            for entry in entries {
                let config = discriminators.resolve(stage, entry).map_err(|e| match e {
                    Error::ConfigValidation(message) => Error::ConfigValidation(format!(
                        "Target '{}', {} stage: {}",
                        target.name, stage, message
                    )),
                    other => other,
                })?;
                target = target.with_step(stage, config);
            }
        }

        Ok(target)
    }
}
