//! Plugin definitions and the plugin registry.
//!
//! A plugin is an executable check routine plus the schema of options it
//! accepts. Plugins are registered once at startup, either as a factory that
//! builds a fresh instance per invocation or as a shared instance.

pub mod builtin;
pub mod options;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::ReturnValue;

pub use options::{OptionsError, ParsedOptions, PluginOption};

/// A check routine.
///
/// `Ok(None)` means the plugin produced no result; the invoker reports it as UNKNOWN.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn execute(&self, options: &ParsedOptions) -> anyhow::Result<Option<ReturnValue>>;
}

/// Builds plugin instances.
pub trait PluginFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Arc<dyn Plugin>>;
}

impl<F> PluginFactory for F
where
    F: Fn() -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync,
{
    fn create(&self) -> anyhow::Result<Arc<dyn Plugin>> {
        self()
    }
}

#[derive(Clone)]
pub enum PluginSource {
    Factory(Arc<dyn PluginFactory>),
    Instance(Arc<dyn Plugin>),
}

#[derive(Clone)]
pub struct PluginDefinition {
    pub name: String,
    pub description: String,
    pub options: Vec<PluginOption>,
    pub source: PluginSource,
}

impl PluginDefinition {
    pub fn with_factory(
        name: impl Into<String>,
        factory: impl PluginFactory + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            options: Vec::new(),
            source: PluginSource::Factory(Arc::new(factory)),
        }
    }

    pub fn with_instance(name: impl Into<String>, plugin: Arc<dyn Plugin>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            options: Vec::new(),
            source: PluginSource::Instance(plugin),
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn option(mut self, option: PluginOption) -> Self {
        self.options.push(option);
        self
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin {0} is not configured")]
    NotFound(String),
    #[error("Plugin {name} could not be instantiated: {reason}")]
    Instantiation { name: String, reason: String },
    #[error("Plugin {name} has an invalid option schema: {source}")]
    InvalidSchema { name: String, source: OptionsError },
    #[error("Plugin {0} is already registered")]
    Duplicate(String),
}

/// Plugin definitions keyed by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<PluginDefinition>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for definition in builtin::definitions() {
            registry
                .add(definition)
                .expect("built-in plugin definitions are valid");
        }
        registry
    }

    pub fn add(&mut self, definition: PluginDefinition) -> Result<(), PluginError> {
        options::validate_schema(&definition.options).map_err(|source| {
            PluginError::InvalidSchema {
                name: definition.name.clone(),
                source,
            }
        })?;
        if self.plugins.contains_key(&definition.name) {
            return Err(PluginError::Duplicate(definition.name));
        }
        self.plugins
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginDefinition>> {
        self.plugins.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Resolve `name` to a ready-to-run plugin.
    pub fn instantiate(&self, name: &str) -> Result<PluginProxy, PluginError> {
        let definition = self
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let plugin = match &definition.source {
            PluginSource::Instance(plugin) => plugin.clone(),
            PluginSource::Factory(factory) => {
                factory
                    .create()
                    .map_err(|e| PluginError::Instantiation {
                        name: name.to_string(),
                        reason: format!("{:#}", e),
                    })?
            }
        };

        Ok(PluginProxy { definition, plugin })
    }
}

/// Error raised while running a resolved plugin.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("{0}")]
    Failed(String),
}

/// A plugin instance bound to its definition.
#[derive(Clone)]
pub struct PluginProxy {
    definition: Arc<PluginDefinition>,
    plugin: Arc<dyn Plugin>,
}

impl PluginProxy {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Parse `argv` against the plugin's schema and run it.
    pub async fn execute(&self, argv: &[String]) -> Result<Option<ReturnValue>, ExecutionError> {
        let options = options::parse(&self.definition.name, &self.definition.options, argv)?;
        self.plugin
            .execute(&options)
            .await
            .map_err(|e| ExecutionError::Failed(format!("{:#}", e)))
    }
}
