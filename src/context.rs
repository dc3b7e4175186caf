use std::sync::Arc;

use crate::commands::CommandInvoker;
use crate::config::ServerConfig;
use crate::core::EventBus;
use crate::server::AllowList;

/// Everything a listener and its workers share.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub invoker: Arc<CommandInvoker>,
    pub allow: Arc<AllowList>,
    pub events: EventBus,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        invoker: CommandInvoker,
        allow: AllowList,
        events: EventBus,
    ) -> Self {
        Self {
            config: Arc::new(config),
            invoker: Arc::new(invoker),
            allow: Arc::new(allow),
            events,
        }
    }
}
