//! nrped: a Nagios Remote Plugin Executor daemon.
//!
//! Remote monitoring servers send a named check over TCP (optionally TLS);
//! the daemon runs the configured plugin and answers with a status, message
//! and performance data in the fixed-size NRPE packet format.

pub mod commands;
pub mod config;
pub mod context;
pub mod core;
pub mod logging;
pub mod plugins;
pub mod protocol;
pub mod server;
