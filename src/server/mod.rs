//! The NRPE daemon: listeners, connection workers and their watchdogs.

pub mod allow_list;
pub mod listener;
pub mod tls;
pub mod watchdog;
pub mod worker;

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::AppConfig;
use crate::context::ServerContext;
use crate::core::{EventKind, ServerEvent};

pub use allow_list::AllowList;
pub use listener::Listener;
pub use watchdog::{Watchdog, WorkerHandle};
pub use worker::TIMEOUT_MESSAGE;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to resolve {0}")]
    Resolve(String),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("Binding {0} requires TLS but no certificate is configured")]
    TlsNotConfigured(String),
    #[error("No listener could be started")]
    NoListeners,
}

/// All listeners of a running daemon.
pub struct Server {
    listeners: Vec<Listener>,
}

impl Server {
    /// Start one listener per configured binding. A binding that fails is
    /// reported and skipped; only when none starts is an error returned.
    pub async fn start(config: &AppConfig, ctx: ServerContext) -> Result<Self, ServerError> {
        let mut listeners = Vec::with_capacity(config.bind.len());

        for binding in &config.bind {
            match Listener::bind(binding, config.tls.as_ref(), ctx.clone()).await {
                Ok(listener) => listeners.push(listener),
                Err(e) => ctx.events.notify(
                    ServerEvent::new("server", EventKind::Error, "Listener failed to start")
                        .with("address", format!("{}:{}", binding.address, binding.port))
                        .with("error", e),
                ),
            }
        }

        if listeners.is_empty() {
            return Err(ServerError::NoListeners);
        }
        Ok(Self { listeners })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(Listener::local_addr).collect()
    }

    pub async fn shutdown(self) {
        for listener in self.listeners {
            listener.close().await;
        }
    }
}
