//! Command definitions and their invocation.
//!
//! - `definition`: configured commands and the command registry
//! - `command_line`: tokenizing, `$ARGn$` macro substitution, quoting
//! - `invoker`: resolves a command to a plugin, runs it, normalises the result

pub mod command_line;
pub mod definition;
pub mod invoker;

pub use definition::{CommandDefinition, CommandOption, CommandRegistry, DuplicateCommand};
pub use invoker::{CommandInvoker, DispatchError, HEALTH_CHECK_COMMAND};
