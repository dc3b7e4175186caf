//! Connection worker.
//!
//! A worker serves exactly one request: read a packet, dispatch it through the
//! shared [`CommandInvoker`](crate::commands::CommandInvoker), write the
//! response and close the socket. The watchdog may stop it at any point
//! through its [`WorkerHandle`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use super::watchdog::WorkerHandle;
use crate::context::ServerContext;
use crate::core::{EventKind, ReturnValue, ServerEvent};
use crate::protocol::packet::{
    Packet, PacketError, PacketType, VERSION_1, VERSION_2, read_packet, write_packet,
};

pub const TIMEOUT_MESSAGE: &str = "Command execution timeout";

/// Bound on writing the timeout answer and on closing the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Serve one accepted connection, performing the TLS handshake first when
/// an acceptor is given. Always leaves the handle finished.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    handle: Arc<WorkerHandle>,
    ctx: ServerContext,
) {
    let Some(acceptor) = tls else {
        Worker::new(stream, peer, handle, ctx).run().await;
        return;
    };

    let accepted = tokio::select! {
        _ = handle.cancelled() => None,
        result = acceptor.accept(stream) => Some(result),
    };

    match accepted {
        Some(Ok(stream)) => Worker::new(stream, peer, handle, ctx).run().await,
        Some(Err(e)) => {
            ctx.events.notify(
                ServerEvent::new("worker", EventKind::Error, "TLS handshake failed")
                    .with("peer", peer)
                    .with("error", e),
            );
            handle.finish();
        }
        None => {
            debug!(peer = %peer, "Stopped during TLS handshake");
            handle.finish();
        }
    }
}

pub struct Worker<S> {
    stream: S,
    peer: SocketAddr,
    handle: Arc<WorkerHandle>,
    ctx: ServerContext,
}

impl<S> Worker<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: SocketAddr, handle: Arc<WorkerHandle>, ctx: ServerContext) -> Self {
        Self {
            stream,
            peer,
            handle,
            ctx,
        }
    }

    pub async fn run(self) {
        let Self {
            mut stream,
            peer,
            handle,
            ctx,
        } = self;

        let outcome = tokio::select! {
            _ = handle.cancelled() => None,
            response = answer(&mut stream, peer, &ctx) => Some(response),
        };

        match outcome {
            Some(Some(response)) if handle.begin_response() => {
                tokio::select! {
                    _ = handle.cancelled() => {
                        debug!(peer = %peer, "Response write aborted");
                    }
                    result = write_packet(&mut stream, &response) => {
                        if let Err(e) = result {
                            report_io(&ctx, peer, "Failed to write response", &e);
                        }
                    }
                }
            }
            Some(None) => {}
            // Stopped by the watchdog, either mid-dispatch or just before responding.
            Some(Some(_)) | None => write_timeout(&mut stream, peer, &ctx).await,
        }

        let _ = timeout(CLOSE_GRACE, stream.shutdown()).await;
        handle.finish();
        debug!(peer = %peer, worker = %handle.id, "Connection closed");
    }
}

/// Read one request and compute the response. `None` means nothing should be sent.
async fn answer<S>(stream: &mut S, peer: SocketAddr, ctx: &ServerContext) -> Option<Packet>
where
    S: AsyncRead + Unpin,
{
    let request = match read_packet(stream).await {
        Ok(packet) => packet,
        Err(PacketError::Malformed(0)) => {
            debug!(peer = %peer, "Peer closed without sending a request");
            return None;
        }
        Err(PacketError::Malformed(received)) => {
            debug!(peer = %peer, received, "Short request packet");
            return Some(Packet::response(
                VERSION_2,
                &ReturnValue::unknown("Malformed request packet"),
            ));
        }
        Err(e) => {
            report_io(ctx, peer, "Failed to read request", &e);
            return None;
        }
    };

    let version = response_version(request.version);

    if request.validate().is_err() {
        return Some(Packet::response(version, &ReturnValue::unknown("BAD REQUEST CRC")));
    }
    if request.kind() != Some(PacketType::Query) {
        return Some(Packet::response(
            version,
            &ReturnValue::unknown("Invalid Packet Type"),
        ));
    }

    let message = request.message();
    let mut parts = message.split('!');
    let command = parts.next().unwrap_or_default();
    let args: Vec<String> = parts.map(str::to_string).collect();

    debug!(peer = %peer, command = %command, args = args.len(), "Dispatching request");
    let result = ctx.invoker.invoke(command, &args).await;
    Some(Packet::response(version, &result))
}

/// Answer in the caller's protocol version when it is one we speak.
fn response_version(request_version: u16) -> u16 {
    match request_version {
        VERSION_1 | VERSION_2 => request_version,
        _ => VERSION_2,
    }
}

async fn write_timeout<S>(stream: &mut S, peer: SocketAddr, ctx: &ServerContext)
where
    S: AsyncWrite + Unpin,
{
    let packet = Packet::response(VERSION_2, &ReturnValue::unknown(TIMEOUT_MESSAGE));
    match timeout(CLOSE_GRACE, write_packet(stream, &packet)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => report_io(ctx, peer, "Failed to write timeout response", &e),
        Err(_) => debug!(peer = %peer, "Timeout response not delivered in time"),
    }
}

fn report_io(ctx: &ServerContext, peer: SocketAddr, message: &str, error: &PacketError) {
    ctx.events.notify(
        ServerEvent::new("worker", EventKind::Error, message)
            .with("peer", peer)
            .with("error", error),
    );
}
