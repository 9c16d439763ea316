//! Stage modules: the plugin registration unit
//!
//! A module binds a configuration tag to a step implementation for one stage.
//! Modules are either compiled in ([`NativeModule`]) or provided by external
//! plugin binaries ([`plugin::PluginModule`]).

pub mod builtin;
pub mod loader;
pub mod plugin;
pub mod registry;

pub use builtin::register_builtin_modules;
pub use loader::{LoadReport, ModuleLoader, PluginSettings};
pub use registry::{ModuleRegistry, RegisteredStage, TypeDiscriminators};

use crate::core::{
    Archive, Build, ConfigType, Distribute, Notify, PipelineStep, Source, Stage, StageKind,
    StepConfig,
};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Plugin descriptor for one stage
pub trait Module<S: Stage>: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Name of the step implementation the module instantiates
    fn step_type(&self) -> &str;

    /// Serialization tag of the configuration this module accepts
    fn step_config_name(&self) -> &str;

    /// Runtime type of the configuration this module accepts
    fn step_config_type(&self) -> ConfigType;

    /// Turn a tagged step object into this module's configuration type
    fn deserialize_config(&self, value: serde_json::Value) -> Result<Arc<dyn StepConfig>>;

    /// Create a fresh, uninitialized step
    fn create_step(&self) -> Box<dyn PipelineStep<S>>;
}

/// Descriptor of a registered module, independent of its stage type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub stage: StageKind,
    pub step_type: String,
    pub config_name: String,
    pub config_type: String,
}

impl ModuleInfo {
    pub fn of<S: Stage>(module: &dyn Module<S>) -> Self {
        Self {
            name: module.name().to_string(),
            stage: S::KIND,
            step_type: module.step_type().to_string(),
            config_name: module.step_config_name().to_string(),
            config_type: module.step_config_type().to_string(),
        }
    }
}

/// A module of any stage, used where the stage is only known at runtime
#[derive(Clone)]
pub enum AnyModule {
    Source(Arc<dyn Module<Source>>),
    Build(Arc<dyn Module<Build>>),
    Archive(Arc<dyn Module<Archive>>),
    Distribute(Arc<dyn Module<Distribute>>),
    Notify(Arc<dyn Module<Notify>>),
}

impl AnyModule {
    pub fn stage(&self) -> StageKind {
        match self {
            AnyModule::Source(_) => StageKind::Source,
            AnyModule::Build(_) => StageKind::Build,
            AnyModule::Archive(_) => StageKind::Archive,
            AnyModule::Distribute(_) => StageKind::Distribute,
            AnyModule::Notify(_) => StageKind::Notify,
        }
    }

    pub fn info(&self) -> ModuleInfo {
        match self {
            AnyModule::Source(m) => ModuleInfo::of(m.as_ref()),
            AnyModule::Build(m) => ModuleInfo::of(m.as_ref()),
            AnyModule::Archive(m) => ModuleInfo::of(m.as_ref()),
            AnyModule::Distribute(m) => ModuleInfo::of(m.as_ref()),
            AnyModule::Notify(m) => ModuleInfo::of(m.as_ref()),
        }
    }
}

impl std::fmt::Debug for AnyModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnyModule").field(&self.info()).finish()
    }
}

/// A compiled-in module: config type `C`, default-constructed step `T`
pub struct NativeModule<S, C, T> {
    name: &'static str,
    config_name: &'static str,
    _marker: PhantomData<fn() -> (S, C, T)>,
}

impl<S, C, T> NativeModule<S, C, T> {
    pub fn new(name: &'static str, config_name: &'static str) -> Self {
        Self {
            name,
            config_name,
            _marker: PhantomData,
        }
    }
}

impl<S, C, T> Module<S> for NativeModule<S, C, T>
where
    S: Stage,
    C: StepConfig + DeserializeOwned + 'static,
    T: PipelineStep<S> + Default + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn step_type(&self) -> &str {
        std::any::type_name::<T>()
    }

    fn step_config_name(&self) -> &str {
        self.config_name
    }

    fn step_config_type(&self) -> ConfigType {
        ConfigType::of::<C>()
    }

    fn deserialize_config(&self, value: serde_json::Value) -> Result<Arc<dyn StepConfig>> {
        let config: C = serde_json::from_value(value).map_err(|e| {
            Error::ConfigValidation(format!("Invalid '{}' step: {}", self.config_name, e))
        })?;
        Ok(Arc::new(config))
    }

    fn create_step(&self) -> Box<dyn PipelineStep<S>> {
        Box::new(T::default())
    }
}
