//! Installed modules, indexed by stage and configuration type
//!
//! The registry is filled once during agent startup and then shared as an
//! `Arc<ModuleRegistry>`; nothing mutates it afterwards, so readers need no lock.

use crate::core::{
    Archive, Build, ConfigType, Distribute, Notify, Source, Stage, StageKind, StepConfig,
};
use crate::error::{Error, Result};
use crate::modules::{AnyModule, Module, ModuleInfo};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A stage whose modules the registry can hold
pub trait RegisteredStage: Stage + Sized {
    fn modules(registry: &ModuleRegistry) -> &Vec<Arc<dyn Module<Self>>>;

    fn modules_mut(registry: &mut ModuleRegistry) -> &mut Vec<Arc<dyn Module<Self>>>;
}

macro_rules! registered_stage {
    ($stage:ty, $field:ident) => {
        impl RegisteredStage for $stage {
            fn modules(registry: &ModuleRegistry) -> &Vec<Arc<dyn Module<Self>>> {
                &registry.$field
            }

            fn modules_mut(registry: &mut ModuleRegistry) -> &mut Vec<Arc<dyn Module<Self>>> {
                &mut registry.$field
            }
        }
    };
}

registered_stage!(Source, source);
registered_stage!(Build, build);
registered_stage!(Archive, archive);
registered_stage!(Distribute, distribute);
registered_stage!(Notify, notify);

/// Installed modules, one ordered list per stage
#[derive(Default)]
pub struct ModuleRegistry {
    source: Vec<Arc<dyn Module<Source>>>,
    build: Vec<Arc<dyn Module<Build>>>,
    archive: Vec<Arc<dyn Module<Archive>>>,
    distribute: Vec<Arc<dyn Module<Distribute>>>,
    notify: Vec<Arc<dyn Module<Notify>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to its stage
    ///
    /// Fails without changing the registry when the stage already has a
    /// module for the same configuration type.
    pub fn register_module<S: RegisteredStage>(&mut self, module: Arc<dyn Module<S>>) -> Result<()> {
        let config_type = module.step_config_type();
        let modules = S::modules_mut(self);
        if modules
            .iter()
            .any(|existing| existing.step_config_type() == config_type)
        {
            return Err(Error::DuplicateModule {
                stage: S::KIND,
                config_type: config_type.to_string(),
            });
        }

        debug!(
            "Registered {} module '{}' for config '{}'",
            S::KIND,
            module.name(),
            module.step_config_name()
        );
        modules.push(module);
        Ok(())
    }

    /// Add a module whose stage is only known at runtime
    pub fn register(&mut self, module: AnyModule) -> Result<()> {
        match module {
            AnyModule::Source(m) => self.register_module(m),
            AnyModule::Build(m) => self.register_module(m),
            AnyModule::Archive(m) => self.register_module(m),
            AnyModule::Distribute(m) => self.register_module(m),
            AnyModule::Notify(m) => self.register_module(m),
        }
    }

    /// Modules of a stage, in registration order
    pub fn modules<S: RegisteredStage>(&self) -> &[Arc<dyn Module<S>>] {
        S::modules(self)
    }

    /// Descriptors of the modules whose step implements the contract of `stage`
    pub fn modules_for_step_type(&self, stage: StageKind) -> Vec<ModuleInfo> {
        match stage {
            StageKind::Source => self.infos_of::<Source>(),
            StageKind::Build => self.infos_of::<Build>(),
            StageKind::Archive => self.infos_of::<Archive>(),
            StageKind::Distribute => self.infos_of::<Distribute>(),
            StageKind::Notify => self.infos_of::<Notify>(),
        }
    }

    /// Every module descriptor, in stage order
    pub fn infos(&self) -> Vec<ModuleInfo> {
        StageKind::ALL
            .iter()
            .flat_map(|stage| self.modules_for_step_type(*stage))
            .collect()
    }

    pub fn count(&self, stage: StageKind) -> usize {
        match stage {
            StageKind::Source => self.source.len(),
            StageKind::Build => self.build.len(),
            StageKind::Archive => self.archive.len(),
            StageKind::Distribute => self.distribute.len(),
            StageKind::Notify => self.notify.len(),
        }
    }

    pub fn len(&self) -> usize {
        StageKind::ALL.iter().map(|stage| self.count(*stage)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the module owning a configuration type, whatever its stage
    pub fn find_by_config_type(&self, config_type: &ConfigType) -> Option<ModuleInfo> {
        let wanted = config_type.to_string();
        self.infos().into_iter().find(|info| info.config_type == wanted)
    }

    /// Whether a stage already has a module claiming `tag`
    pub fn has_discriminator(&self, stage: StageKind, tag: &str) -> bool {
        self.modules_for_step_type(stage)
            .iter()
            .any(|info| info.config_name == tag)
    }

    /// Per-stage table from configuration tag to deserializer
    pub fn type_discriminators(&self) -> Result<TypeDiscriminators> {
        let mut tables = HashMap::new();
        tables.insert(StageKind::Source, self.discriminators_of::<Source>()?);
        tables.insert(StageKind::Build, self.discriminators_of::<Build>()?);
        tables.insert(StageKind::Archive, self.discriminators_of::<Archive>()?);
        tables.insert(StageKind::Distribute, self.discriminators_of::<Distribute>()?);
        tables.insert(StageKind::Notify, self.discriminators_of::<Notify>()?);
        Ok(TypeDiscriminators { tables })
    }

    fn infos_of<S: RegisteredStage>(&self) -> Vec<ModuleInfo> {
        self.modules::<S>()
            .iter()
            .map(|module| ModuleInfo::of(module.as_ref()))
            .collect()
    }

    fn discriminators_of<S: RegisteredStage>(&self) -> Result<HashMap<String, ConfigDeserializer>> {
        let mut table: HashMap<String, ConfigDeserializer> = HashMap::new();
        for module in self.modules::<S>() {
            let tag = module.step_config_name().to_string();
            if table.contains_key(&tag) {
                return Err(Error::AmbiguousDiscriminator { stage: S::KIND, tag });
            }
            let module = Arc::clone(module);
            table.insert(tag, Arc::new(move |value| module.deserialize_config(value)));
        }
        Ok(table)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.infos())
            .finish()
    }
}

/// Deserializer for one configuration tag
pub type ConfigDeserializer =
    Arc<dyn Fn(serde_json::Value) -> Result<Arc<dyn StepConfig>> + Send + Sync>;

/// Tag → configuration type table for each stage, used when parsing project documents
#[derive(Clone, Default)]
pub struct TypeDiscriminators {
    tables: HashMap<StageKind, HashMap<String, ConfigDeserializer>>,
}

impl TypeDiscriminators {
    /// Known tags of a stage, sorted
    pub fn tags(&self, stage: StageKind) -> Vec<&str> {
        let mut tags: Vec<&str> = self
            .tables
            .get(&stage)
            .map(|table| table.keys().map(String::as_str).collect())
            .unwrap_or_default();
        tags.sort_unstable();
        tags
    }

    pub fn contains(&self, stage: StageKind, tag: &str) -> bool {
        self.tables
            .get(&stage)
            .is_some_and(|table| table.contains_key(tag))
    }

    /// Deserialize a tagged step object into the configuration type its tag names
    pub fn resolve(&self, stage: StageKind, value: serde_json::Value) -> Result<Arc<dyn StepConfig>> {
        let tag = match value.get("name") {
            Some(serde_json::Value::String(tag)) => tag.clone(),
            Some(_) => {
                return Err(Error::ConfigValidation(
                    "Step 'name' must be a string".to_string(),
                ))
            }
            None => {
                return Err(Error::ConfigValidation(
                    "Step is missing its 'name' field".to_string(),
                ))
            }
        };

        let deserialize = self
            .tables
            .get(&stage)
            .and_then(|table| table.get(&tag))
            .ok_or_else(|| Error::ModuleLoad {
                stage,
                tag: tag.clone(),
            })?;

        deserialize(value)
    }
}

impl fmt::Debug for TypeDiscriminators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for stage in StageKind::ALL {
            map.entry(&stage, &self.tags(stage));
        }
        map.finish()
    }
}
