//! Plugins shipped with the daemon.
//!
//! - `CHECK_TEST` answers with a configurable status and text, optionally after
//!   a delay. Useful for checking a deployment end to end.
//! - `CHECK_NATIVE` runs an external Nagios-style plugin executable.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ParsedOptions, Plugin, PluginDefinition, PluginOption};
use crate::commands::command_line::tokenize;
use crate::core::{ReturnValue, Status};

pub const CHECK_TEST: &str = "CHECK_TEST";
pub const CHECK_NATIVE: &str = "CHECK_NATIVE";

pub fn definitions() -> Vec<PluginDefinition> {
    vec![
        PluginDefinition::with_instance(CHECK_TEST, Arc::new(TestPlugin))
            .description("Returns the given status and text, optionally after a delay")
            .option(
                PluginOption::long("text")
                    .short('t')
                    .takes_value()
                    .description("Message to return"),
            )
            .option(
                PluginOption::long("status")
                    .short('s')
                    .takes_value()
                    .description("OK, WARNING, CRITICAL or UNKNOWN (default OK)"),
            )
            .option(
                PluginOption::long("delay")
                    .short('d')
                    .takes_value()
                    .description("Seconds to wait before answering"),
            ),
        PluginDefinition::with_instance(CHECK_NATIVE, Arc::new(NativePlugin))
            .description("Runs an external plugin and relays its exit code and output")
            .option(
                PluginOption::long("executable")
                    .short('e')
                    .takes_value()
                    .required()
                    .description("Path of the plugin executable"),
            )
            .option(
                PluginOption::long("args")
                    .short('a')
                    .takes_value()
                    .description("Arguments for the executable, shell-quoted"),
            ),
    ]
}

/// Longest delay `CHECK_TEST` accepts, one day.
const MAX_DELAY_SECS: f64 = 86_400.0;

pub struct TestPlugin;

#[async_trait]
impl Plugin for TestPlugin {
    async fn execute(&self, options: &ParsedOptions) -> Result<Option<ReturnValue>> {
        let status = match options.option_value("status") {
            Some(name) => name.parse::<Status>()?,
            None => Status::Ok,
        };

        if let Some(delay) = options.option_value("delay") {
            let secs: f64 = delay
                .parse()
                .with_context(|| format!("invalid delay: {}", delay))?;
            if !(0.0..=MAX_DELAY_SECS).contains(&secs) {
                return Err(anyhow!("invalid delay: {}", delay));
            }
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }

        let text = options.option_value_or("text", "test plugin");
        Ok(Some(ReturnValue::new(status, text)))
    }
}

pub struct NativePlugin;

#[async_trait]
impl Plugin for NativePlugin {
    async fn execute(&self, options: &ParsedOptions) -> Result<Option<ReturnValue>> {
        let executable = options
            .option_value("executable")
            .ok_or_else(|| anyhow!("no executable configured"))?;
        let args = options
            .option_value("args")
            .map(|a| tokenize(&a))
            .unwrap_or_default();

        debug!(executable = %executable, args = ?args, "Running external plugin");

        let output = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", executable))?;

        let status = output
            .status
            .code()
            .and_then(|code| Status::from_code(code as i64))
            .unwrap_or(Status::Unknown);

        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = match stdout.trim_end() {
            "" => String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            text => text.to_string(),
        };

        Ok(Some(ReturnValue::new(status, message)))
    }
}
