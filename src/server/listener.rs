use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, lookup_host};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ServerError;
use super::tls::build_acceptor;
use super::watchdog::{Tracker, Watchdog, WorkerHandle};
use super::worker::serve_connection;
use crate::config::{BindAddress, TlsConfig};
use crate::context::ServerContext;
use crate::core::{EventBus, EventKind, ServerEvent};
use crate::logging::LogThrottle;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// One bound socket with its accept loop and watchdog.
pub struct Listener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    watchdog: Watchdog,
    events: EventBus,
}

impl Listener {
    /// Bind `binding` and start accepting. Returns once the socket is bound.
    pub async fn bind(
        binding: &BindAddress,
        tls: Option<&TlsConfig>,
        ctx: ServerContext,
    ) -> Result<Self, ServerError> {
        let acceptor = if binding.tls {
            let config = tls.ok_or_else(|| {
                ServerError::TlsNotConfigured(format!("{}:{}", binding.address, binding.port))
            })?;
            Some(build_acceptor(config)?)
        } else {
            None
        };

        let addr = lookup_host((binding.address.as_str(), binding.port))
            .await
            .map_err(|e| ServerError::Resolve(format!("{}: {}", binding.address, e)))?
            .next()
            .ok_or_else(|| ServerError::Resolve(format!("{}: no address", binding.address)))?;

        let socket = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let watchdog = Watchdog::start(
            ctx.config.command_timeout,
            ctx.config.watchdog_interval,
            ctx.events.clone(),
        );
        let cancel = CancellationToken::new();
        let events = ctx.events.clone();

        events.notify(
            ServerEvent::new("listener", EventKind::Info, "Listener started")
                .with("address", local_addr)
                .with("tls", acceptor.is_some()),
        );

        let accept_task = tokio::spawn(accept_loop(
            socket,
            local_addr,
            acceptor,
            ctx,
            watchdog.tracker(),
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            cancel,
            accept_task,
            watchdog,
            events,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and force-stop any connections still being served.
    pub async fn close(self) {
        self.cancel.cancel();
        if tokio::time::timeout(CLOSE_TIMEOUT, self.accept_task)
            .await
            .is_err()
        {
            debug!(address = %self.local_addr, "Accept loop did not exit in time");
        }
        self.watchdog.shutdown().await;

        self.events.notify(
            ServerEvent::new("listener", EventKind::Info, "Listener closed")
                .with("address", self.local_addr),
        );
    }
}

async fn accept_loop(
    socket: TcpListener,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    ctx: ServerContext,
    tracker: Tracker,
    cancel: CancellationToken,
) {
    let throttle = LogThrottle::new(Duration::from_secs(5));

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = socket.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                if !ctx.allow.is_allowed(peer.ip()) {
                    ctx.events.notify(
                        ServerEvent::new("listener", EventKind::Info, "Connection refused")
                            .with("peer", peer)
                            .with("address", local_addr),
                    );
                    drop(stream);
                    continue;
                }

                debug!(peer = %peer, "Client connected");
                let handle = WorkerHandle::new(peer);
                tracker.track(handle.clone());
                tokio::spawn(serve_connection(
                    stream,
                    peer,
                    acceptor.clone(),
                    handle,
                    ctx.clone(),
                ));
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    break;
                }
                if throttle.should_log() {
                    ctx.events.notify(
                        ServerEvent::new("listener", EventKind::Error, "Failed to accept connection")
                            .with("address", local_addr)
                            .with("error", e),
                    );
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }

    debug!(address = %local_addr, "Accept loop exited");
}
