//! Daemon configuration.
//!
//! Values are layered with figment: built-in defaults, then the TOML file,
//! then `NRPED_`-prefixed environment variables, then command-line overrides.
//!
//! ```toml
//! allow = ["127.0.0.1", "nagios.example.com"]
//! command_timeout_secs = 10
//!
//! [[bind]]
//! address = "0.0.0.0"
//! port = 5666
//! tls = true
//!
//! [tls]
//! certificate = "/etc/nrped/cert.pem"
//! private_key = "/etc/nrped/key.pem"
//!
//! [commands.check_disk]
//! plugin = "CHECK_NATIVE"
//! args = "--executable /usr/lib/nagios/plugins/check_disk"
//!
//! [[commands.check_disk.option]]
//! name = "args"
//! value = "-w $ARG1$ -c $ARG2$ -p /"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::{CommandDefinition, CommandOption, CommandRegistry, DuplicateCommand};

pub const DEFAULT_PORT: u16 = 5666;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    Missing(PathBuf),
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindAddress {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

impl BindAddress {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            tls: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub certificate: PathBuf,
    /// PEM private key
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub plugin: String,
    #[serde(default)]
    pub args: String,
    #[serde(default, rename = "option")]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind: Vec<BindAddress>,
    /// Peers allowed to connect, as addresses or host names
    pub allow: Vec<String>,
    /// Substitute caller arguments into `$ARGn$` macros
    pub accept_params: bool,
    pub command_timeout_secs: u64,
    pub watchdog_interval_ms: u64,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: vec![BindAddress::new("0.0.0.0", DEFAULT_PORT)],
            allow: vec!["127.0.0.1".to_string(), "::1".to_string()],
            accept_params: true,
            command_timeout_secs: 10,
            watchdog_interval_ms: 2000,
            tls: None,
            commands: BTreeMap::new(),
        }
    }
}

/// Runtime settings shared by every listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Longest a connection may run before the watchdog stops it
    pub command_timeout: Duration,
    pub watchdog_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(2),
        }
    }
}

impl AppConfig {
    /// Load the configuration from `path` (if any), the environment and `overrides`.
    pub fn new<T: Serialize>(path: Option<&Path>, overrides: Option<&T>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("NRPED_").split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.is_empty() {
            return Err(ConfigError::Invalid("no bind address configured".into()));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid("command_timeout_secs must be positive".into()));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(ConfigError::Invalid("watchdog_interval_ms must be positive".into()));
        }
        if self.allow.is_empty() {
            return Err(ConfigError::Invalid(
                "allow list is empty, no peer could connect".into(),
            ));
        }
        if self.tls.is_none() && self.bind.iter().any(|b| b.tls) {
            return Err(ConfigError::Invalid(
                "a TLS binding requires a [tls] section".into(),
            ));
        }
        for (name, command) in &self.commands {
            if command.plugin.is_empty() {
                return Err(ConfigError::Invalid(format!("command {} has no plugin", name)));
            }
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            watchdog_interval: Duration::from_millis(self.watchdog_interval_ms),
        }
    }

    pub fn command_registry(&self) -> Result<CommandRegistry, DuplicateCommand> {
        let mut registry = CommandRegistry::new();
        for (name, command) in &self.commands {
            let mut definition =
                CommandDefinition::new(name.clone(), command.plugin.clone()).with_args(command.args.clone());
            for option in &command.options {
                definition = definition.with_option(option.clone());
            }
            registry.add(definition)?;
        }
        Ok(registry)
    }
}
