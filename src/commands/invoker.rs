//! Resolves command names to plugins and runs them.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, warn};

use super::command_line::{render, substitute};
use super::definition::{CommandDefinition, CommandRegistry};
use crate::core::{ReturnValue, Status};
use crate::plugins::{ExecutionError, PluginError, PluginRegistry};

/// Command answered by the daemon itself, used by pollers to check it is alive.
pub const HEALTH_CHECK_COMMAND: &str = "_NRPE_CHECK";

/// Every way an invocation can fail to produce a plugin result.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Bad command")]
    BadCommand,
    #[error(transparent)]
    Configuration(#[from] PluginError),
    #[error("{0}")]
    BadArguments(String),
    #[error("Plugin execution error: {0}")]
    Execution(String),
    #[error("Command {command} with args [{args}] returned null")]
    NullResult { command: String, args: String },
}

impl From<DispatchError> for ReturnValue {
    fn from(err: DispatchError) -> Self {
        ReturnValue::new(Status::Unknown, err.to_string())
    }
}

impl From<ExecutionError> for DispatchError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Options(e) => DispatchError::BadArguments(e.to_string()),
            ExecutionError::Failed(msg) => DispatchError::Execution(msg),
        }
    }
}

/// Turn a panicked or cancelled plugin task into an execution error.
fn join_failure(err: JoinError) -> DispatchError {
    if err.is_panic() {
        let payload = err.into_panic();
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "plugin panicked".to_string());
        DispatchError::Execution(text)
    } else {
        DispatchError::Execution("plugin task was cancelled".to_string())
    }
}

/// Aborts the plugin task when the invocation is dropped (e.g. on timeout).
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Dispatches commands to plugins. Shared by every listener.
pub struct CommandInvoker {
    commands: Arc<CommandRegistry>,
    plugins: Arc<PluginRegistry>,
    accept_params: bool,
}

impl CommandInvoker {
    pub fn new(commands: Arc<CommandRegistry>, plugins: Arc<PluginRegistry>) -> Self {
        Self {
            commands,
            plugins,
            accept_params: true,
        }
    }

    /// When disabled, `$ARGn$` macros are never replaced with caller arguments.
    pub fn accept_params(mut self, accept: bool) -> Self {
        self.accept_params = accept;
        self
    }

    /// Run `command` with positional `args`. Always produces a result.
    pub async fn invoke(&self, command: &str, args: &[String]) -> ReturnValue {
        if command == HEALTH_CHECK_COMMAND {
            return ReturnValue::ok(format!("nrped v{}", env!("CARGO_PKG_VERSION")));
        }

        match self.dispatch(command, args).await {
            Ok(result) => result,
            Err(err) => {
                debug!(command = %command, error = %err, "Command failed");
                err.into()
            }
        }
    }

    /// The argument vector `command` would be run with, after macro substitution.
    pub fn effective_command_line(&self, command: &str, args: &[String]) -> Option<Vec<String>> {
        let definition = self.commands.get(command)?;
        Some(self.expand(&definition, args))
    }

    fn expand(&self, definition: &CommandDefinition, args: &[String]) -> Vec<String> {
        let argv = definition.command_line();
        if !self.accept_params {
            return argv;
        }
        argv.iter().map(|token| substitute(token, args)).collect()
    }

    async fn dispatch(&self, command: &str, args: &[String]) -> Result<ReturnValue, DispatchError> {
        let definition = self.commands.get(command).ok_or(DispatchError::BadCommand)?;
        let argv = self.expand(&definition, args);

        let proxy = self.plugins.instantiate(&definition.plugin).map_err(|e| {
            warn!(command = %command, plugin = %definition.plugin, error = %e, "Plugin resolution failed");
            DispatchError::Configuration(e)
        })?;

        debug!(command = %command, plugin = %proxy.name(), argv = %render(&argv), "Invoking plugin");

        let task_argv = argv.clone();
        let task = tokio::spawn(async move { proxy.execute(&task_argv).await });
        let _guard = AbortOnDrop(task.abort_handle());

        let outcome = task.await.map_err(join_failure)?;
        match outcome? {
            Some(result) => Ok(result),
            None => Err(DispatchError::NullResult {
                command: command.to_string(),
                args: render(&argv),
            }),
        }
    }
}
