// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon-side endpoint.
//!
//! The bridge itself only dials out. This half exists so daemons and local
//! test fixtures accept sessions with the same TLS setup and framing.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use quinn::{Connection, Endpoint, EndpointConfig, RecvStream, SendStream, ServerConfig};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::FramedStream;
use crate::transport::{self, CLOSE_NORMAL, TlsError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind daemon endpoint: {0}")]
    Bind(#[from] std::io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("session connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),
}

/// Listener settings for a daemon endpoint.
#[derive(Debug, Clone)]
pub struct DaemonServerConfig {
    pub bind_addr: SocketAddr,
    /// PEM certificate chain
    pub cert_pem: Vec<u8>,
    /// PEM private key
    pub key_pem: Vec<u8>,
    /// Handshakes allowed in flight at once
    pub max_incoming: u32,
    /// Concurrent sessions per connection
    pub max_sessions_per_connection: u32,
    pub idle_timeout_ms: u64,
    /// 0 disables keep-alives
    pub keep_alive_interval_ms: u64,
    /// Socket buffer sizes in bytes, 0 keeps the OS default
    pub udp_receive_buffer_size: usize,
    pub udp_send_buffer_size: usize,
}

impl Default for DaemonServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 53000)),
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            max_incoming: 1_000,
            max_sessions_per_connection: 100,
            idle_timeout_ms: 600_000,
            keep_alive_interval_ms: 15_000,
            udp_receive_buffer_size: 2 << 20,
            udp_send_buffer_size: 2 << 20,
        }
    }
}

impl DaemonServerConfig {
    /// Listener tuning from `TRIBUTARY_LISTEN_*` variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `TRIBUTARY_LISTEN_MAX_INCOMING` | `max_incoming` |
    /// | `TRIBUTARY_LISTEN_MAX_SESSIONS` | `max_sessions_per_connection` |
    /// | `TRIBUTARY_LISTEN_IDLE_TIMEOUT_MS` | `idle_timeout_ms` |
    /// | `TRIBUTARY_LISTEN_KEEP_ALIVE_MS` | `keep_alive_interval_ms` |
    /// | `TRIBUTARY_LISTEN_UDP_RECV_BUFFER` | `udp_receive_buffer_size` |
    /// | `TRIBUTARY_LISTEN_UDP_SEND_BUFFER` | `udp_send_buffer_size` |
    ///
    /// Unparsable values are logged and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            default: T,
        ) -> T {
            match lookup(name).map(|raw| raw.trim().parse()) {
                Some(Ok(value)) => value,
                Some(Err(_)) => {
                    warn!(var = name, "ignoring unparsable value");
                    default
                }
                None => default,
            }
        }

        let base = Self::default();
        Self {
            max_incoming: read(&lookup, "TRIBUTARY_LISTEN_MAX_INCOMING", base.max_incoming),
            max_sessions_per_connection: read(
                &lookup,
                "TRIBUTARY_LISTEN_MAX_SESSIONS",
                base.max_sessions_per_connection,
            ),
            idle_timeout_ms: read(
                &lookup,
                "TRIBUTARY_LISTEN_IDLE_TIMEOUT_MS",
                base.idle_timeout_ms,
            ),
            keep_alive_interval_ms: read(
                &lookup,
                "TRIBUTARY_LISTEN_KEEP_ALIVE_MS",
                base.keep_alive_interval_ms,
            ),
            udp_receive_buffer_size: read(
                &lookup,
                "TRIBUTARY_LISTEN_UDP_RECV_BUFFER",
                base.udp_receive_buffer_size,
            ),
            udp_send_buffer_size: read(
                &lookup,
                "TRIBUTARY_LISTEN_UDP_SEND_BUFFER",
                base.udp_send_buffer_size,
            ),
            ..base
        }
    }

    fn quic(&self) -> Result<ServerConfig, ServerError> {
        let mut tuning = transport::tuning(self.keep_alive_interval_ms, self.idle_timeout_ms)?;
        tuning.max_concurrent_bidi_streams(self.max_sessions_per_connection.into());
        // sessions never open unidirectional streams
        tuning.max_concurrent_uni_streams(0u32.into());

        let mut quic =
            ServerConfig::with_crypto(transport::server_crypto(&self.cert_pem, &self.key_pem)?);
        quic.transport_config(Arc::new(tuning));
        quic.max_incoming(self.max_incoming as usize);
        Ok(quic)
    }
}

/// UDP socket with the configured buffer sizes. Sizes the OS refuses are
/// logged and left at their defaults.
fn bind_udp(config: &DaemonServerConfig) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(
        Domain::for_address(config.bind_addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;

    if config.udp_receive_buffer_size > 0
        && let Err(e) = socket.set_recv_buffer_size(config.udp_receive_buffer_size)
    {
        warn!(size = config.udp_receive_buffer_size, error = %e, "receive buffer not applied");
    }
    if config.udp_send_buffer_size > 0
        && let Err(e) = socket.set_send_buffer_size(config.udp_send_buffer_size)
    {
        warn!(size = config.udp_send_buffer_size, error = %e, "send buffer not applied");
    }

    socket.set_nonblocking(true)?;
    socket.bind(&config.bind_addr.into())?;
    Ok(socket.into())
}

/// Listening daemon endpoint.
pub struct DaemonServer {
    endpoint: Endpoint,
}

impl DaemonServer {
    pub fn new(config: DaemonServerConfig) -> Result<Self, ServerError> {
        let quic = config.quic()?;
        let socket = bind_udp(&config)?;
        let runtime = quinn::default_runtime()
            .ok_or_else(|| std::io::Error::other("no async runtime found"))?;
        let endpoint = Endpoint::new(EndpointConfig::default(), Some(quic), socket, runtime)?;

        info!(
            addr = %endpoint.local_addr()?,
            max_incoming = config.max_incoming,
            idle_timeout_ms = config.idle_timeout_ms,
            "daemon endpoint listening"
        );
        Ok(Self { endpoint })
    }

    /// Listen on `bind_addr` with a fresh self-signed `localhost` certificate.
    pub fn localhost_with_config(
        bind_addr: SocketAddr,
        config: DaemonServerConfig,
    ) -> Result<Self, ServerError> {
        let (cert_pem, key_pem) = transport::self_signed(&["localhost"])?;
        Self::new(DaemonServerConfig {
            bind_addr,
            cert_pem,
            key_pem,
            ..config
        })
    }

    /// Next connection that completes its handshake, `None` once closed.
    pub async fn accept(&self) -> Option<DaemonConnection> {
        while let Some(incoming) = self.endpoint.accept().await {
            match incoming.await {
                Ok(connection) => {
                    debug!(remote = %connection.remote_address(), "session connection accepted");
                    return Some(DaemonConnection { connection });
                }
                Err(e) => warn!(error = %e, "handshake failed"),
            }
        }
        None
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    pub fn close(&self) {
        self.endpoint.close(CLOSE_NORMAL, b"daemon shutting down");
    }
}

/// One accepted client connection.
#[derive(Clone)]
pub struct DaemonConnection {
    connection: Connection,
}

impl DaemonConnection {
    /// Wait for the client to open its session stream.
    pub async fn accept_duplex(
        &self,
    ) -> Result<(FramedStream<SendStream>, FramedStream<RecvStream>), ServerError> {
        let (send, recv) = self.connection.accept_bi().await?;
        Ok((FramedStream::new(send), FramedStream::new(recv)))
    }

    pub async fn closed(&self) -> quinn::ConnectionError {
        self.connection.closed().await
    }

    pub fn close(&self, reason: &str) {
        self.connection.close(CLOSE_NORMAL, reason.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn ephemeral() -> DaemonServer {
        DaemonServer::localhost_with_config(
            "127.0.0.1:0".parse().unwrap(),
            DaemonServerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_vars_override_defaults() {
        let vars: HashMap<&str, &str> = [
            ("TRIBUTARY_LISTEN_MAX_SESSIONS", "4"),
            ("TRIBUTARY_LISTEN_KEEP_ALIVE_MS", " 0 "),
            ("TRIBUTARY_LISTEN_MAX_INCOMING", "lots"),
        ]
        .into_iter()
        .collect();
        let config =
            DaemonServerConfig::from_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.max_sessions_per_connection, 4);
        assert_eq!(config.keep_alive_interval_ms, 0);
        assert_eq!(config.max_incoming, 1_000);
        assert_eq!(config.idle_timeout_ms, 600_000);
    }

    #[tokio::test]
    async fn test_missing_certificate_is_rejected() {
        let err = DaemonServer::new(DaemonServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ServerError::Tls(TlsError::Certificate(_))));
    }

    #[tokio::test]
    async fn test_ephemeral_port_is_assigned() {
        let server = ephemeral();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        server.close();
    }

    #[tokio::test]
    async fn test_accept_ends_after_close() {
        let server = ephemeral();
        server.close();
        assert!(server.accept().await.is_none());
    }
}
