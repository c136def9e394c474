// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client endpoint dialing an execution daemon.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::frame::FramedStream;
use crate::transport::{self, CLOSE_NORMAL, TlsError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to open client endpoint: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("cannot dial daemon: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("daemon connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Where and how to reach the daemon.
#[derive(Debug, Clone)]
pub struct DaemonClientConfig {
    pub server_addr: SocketAddr,
    /// Name checked against the daemon certificate
    pub server_name: String,
    /// Accept any daemon certificate. Only for self-signed test daemons.
    pub dangerous_skip_cert_verification: bool,
    /// 0 disables keep-alives
    pub keep_alive_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for DaemonClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 53000)),
            server_name: "localhost".to_string(),
            dangerous_skip_cert_verification: false,
            keep_alive_interval_ms: 10_000,
            // pipelines may stay silent for minutes between rows
            idle_timeout_ms: 600_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// A client endpoint holding at most one live daemon connection.
///
/// The connection is dialed lazily and redialed once the previous one has
/// been closed by either side.
pub struct DaemonClient {
    endpoint: Endpoint,
    live: Mutex<Option<Connection>>,
    config: DaemonClientConfig,
}

impl DaemonClient {
    pub fn new(config: DaemonClientConfig) -> Result<Self, ClientError> {
        let local = match config.server_addr {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };

        let mut quic = ClientConfig::new(transport::client_crypto(
            !config.dangerous_skip_cert_verification,
        )?);
        quic.transport_config(Arc::new(transport::tuning(
            config.keep_alive_interval_ms,
            config.idle_timeout_ms,
        )?));

        let mut endpoint = Endpoint::client(local)?;
        endpoint.set_default_client_config(quic);

        Ok(Self {
            endpoint,
            live: Mutex::new(None),
            config,
        })
    }

    /// Client for a self-signed daemon on the default local port.
    pub fn localhost() -> Result<Self, ClientError> {
        Self::new(DaemonClientConfig {
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &DaemonClientConfig {
        &self.config
    }

    /// Return the live connection, dialing the daemon when there is none.
    #[instrument(skip(self), fields(addr = %self.config.server_addr))]
    pub async fn connect(&self) -> Result<Connection, ClientError> {
        let mut live = self.live.lock().await;
        if let Some(connection) = live.as_ref()
            && connection.close_reason().is_none()
        {
            debug!("connection still open");
            return Ok(connection.clone());
        }

        let connecting = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;
        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        let connection = match tokio::time::timeout(limit, connecting).await {
            Ok(dialed) => dialed?,
            Err(_) => {
                warn!(timeout_ms = self.config.connect_timeout_ms, "daemon did not answer");
                return Err(ClientError::Timeout(self.config.connect_timeout_ms));
            }
        };

        info!(remote = %connection.remote_address(), "daemon connection open");
        *live = Some(connection.clone());
        Ok(connection)
    }

    /// Open the bidirectional stream a session runs on.
    ///
    /// The daemon only learns about the stream once bytes are written, so
    /// callers write their handshake right away.
    pub async fn open_duplex(
        &self,
    ) -> Result<(FramedStream<SendStream>, FramedStream<RecvStream>), ClientError> {
        let (send, recv) = self.connect().await?.open_bi().await?;
        Ok((FramedStream::new(send), FramedStream::new(recv)))
    }

    pub async fn close(&self) {
        if let Some(connection) = self.live.lock().await.take() {
            connection.close(CLOSE_NORMAL, b"client closing");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.live
            .lock()
            .await
            .as_ref()
            .is_some_and(|connection| connection.close_reason().is_none())
    }
}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        if let Some(connection) = self.live.get_mut().take() {
            connection.close(CLOSE_NORMAL, b"client dropped");
        }
    }
}
