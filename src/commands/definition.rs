use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::command_line::tokenize;

/// A literal option appended to a command's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl CommandOption {
    pub fn new(name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.map(str::to_string),
        }
    }

    /// `-n` for one-character names, `--name` otherwise.
    pub fn flag(&self) -> String {
        if self.name.chars().count() == 1 {
            format!("-{}", self.name)
        } else {
            format!("--{}", self.name)
        }
    }
}

/// A named, pre-configured invocation of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    pub name: String,
    pub plugin: String,
    /// Shell-like argument template, may contain `$ARGn$` macros
    pub args: String,
    pub options: Vec<CommandOption>,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            args: String::new(),
            options: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    /// The argument vector before macro substitution. Freshly allocated on every call.
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = tokenize(&self.args);
        for option in &self.options {
            argv.push(option.flag());
            if let Some(value) = option.value.as_ref().filter(|v| !v.is_empty()) {
                argv.push(value.clone());
            }
        }
        argv
    }
}

#[derive(Debug, Error)]
#[error("Command {0} is already defined")]
pub struct DuplicateCommand(pub String);

/// Command definitions keyed by name.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandDefinition>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, definition: CommandDefinition) -> Result<(), DuplicateCommand> {
        if self.commands.contains_key(&definition.name) {
            return Err(DuplicateCommand(definition.name));
        }
        self.commands
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandDefinition>> {
        self.commands.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
