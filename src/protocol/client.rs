//! Query client for an NRPE daemon.
//!
//! Sends a single query packet and decodes the response, the way a
//! `check_nrpe`-style poller does. Plain TCP only.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::packet::{Packet, PacketError, PacketType, VERSION_2, read_packet, write_packet};
use crate::core::{ReturnValue, Status};

/// Client for querying a daemon.
pub struct CheckClient {
    addr: SocketAddr,
    timeout: Duration,
}

/// Error returned by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Communication error: {0}")]
    Packet(#[from] PacketError),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

impl CheckClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `command` remotely and return its result.
    pub async fn check<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<ReturnValue, ClientError> {
        let request = Packet::query(VERSION_2, command, args);
        self.send(&request).await
    }

    /// Send an arbitrary packet and decode the response. The response CRC is verified.
    pub async fn send(&self, request: &Packet) -> Result<ReturnValue, ClientError> {
        timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    async fn exchange(&self, request: &Packet) -> Result<ReturnValue, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;

        write_packet(&mut stream, request).await?;
        let response = read_packet(&mut stream).await?;
        response.validate()?;

        if response.kind() != Some(PacketType::Response) {
            return Err(ClientError::Unexpected(format!(
                "packet type {}",
                response.packet_type
            )));
        }

        let status = Status::from_code(response.result_code as i64).ok_or_else(|| {
            ClientError::Unexpected(format!("result code {}", response.result_code))
        })?;

        Ok(ReturnValue::new(status, response.message()))
    }
}
