// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon session: one authenticated duplex connection to an execution daemon.
//!
//! The session owns the only asynchronous delivery path of the bridge. After
//! [`DaemonSession::start`] a background task reads `Event` frames, decodes
//! them and fires them through the [`EventRegistry`]. Outbound traffic is
//! limited to stop requests, written as `Control` frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::{Connection, RecvStream, SendStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tributary_protocol::transport::CLOSE_NORMAL;
use tributary_protocol::wire::{DaemonEvent, Hello, HelloAck};
use tributary_protocol::{
    DaemonClient, DaemonClientConfig, Frame, FrameError, FramedStream, MessageType,
};

use crate::auth::{HandshakeHeaders, SessionAuthenticator};
use crate::config::SessionConfig;
use crate::convert::{decode_event, encode_stop};
use crate::error::SessionError;
use crate::registry::EventRegistry;
use crate::types::StopMessage;

pub const MODE_HEADER: &str = "x-tributary-mode";

/// Outbound half of a daemon connection, as seen by the adapters.
#[async_trait]
pub trait DaemonChannel: Send + Sync {
    /// Send a stop request. Failures are reported, never retried.
    async fn send_message(&self, message: &StopMessage) -> Result<(), SessionError>;

    /// Token cancelled once the connection is gone.
    fn closed(&self) -> CancellationToken;

    async fn close(&self);
}

pub struct DaemonSession {
    session_id: String,
    target: String,
    client: DaemonClient,
    connection: Connection,
    send: Mutex<Option<FramedStream<SendStream>>>,
    recv: Mutex<Option<FramedStream<RecvStream>>>,
    closed: CancellationToken,
}

impl DaemonSession {
    /// Authenticate and connect.
    ///
    /// In daemon mode an authentication decision is mandatory and every
    /// credential problem is reported before the network is touched.
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect(config: &SessionConfig) -> Result<Self, SessionError> {
        let authenticator = if config.use_daemon {
            let settings = config
                .auth
                .as_ref()
                .ok_or(SessionError::MissingAuthentication)?;
            SessionAuthenticator::from_settings(settings)?
        } else {
            SessionAuthenticator::disabled()
        };
        Self::connect_with(config, &authenticator).await
    }

    /// Connect using an already built authenticator.
    pub async fn connect_with(
        config: &SessionConfig,
        authenticator: &SessionAuthenticator,
    ) -> Result<Self, SessionError> {
        let target = config.target_uri();
        let mut headers = HandshakeHeaders::new();

        if config.use_daemon {
            authenticator.apply(&target, &mut headers).await?;
            headers.insert(MODE_HEADER.to_string(), "daemon".to_string());
        } else {
            headers.insert(MODE_HEADER.to_string(), "direct".to_string());
        }

        let server_addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found")
                })
            })
            .map_err(|source| SessionError::Resolve {
                target: target.clone(),
                source,
            })?;

        let client = DaemonClient::new(DaemonClientConfig {
            server_addr,
            server_name: config.effective_server_name().to_string(),
            dangerous_skip_cert_verification: config.skip_cert_verification,
            keep_alive_interval_ms: config.keep_alive_interval_ms,
            idle_timeout_ms: config.idle_timeout_ms,
            connect_timeout_ms: config.connect_timeout_ms,
        })?;

        let unreachable = |source| SessionError::Unreachable {
            target: target.clone(),
            source,
        };
        let connection = client.connect().await.map_err(unreachable)?;
        let (mut send, mut recv) = client.open_duplex().await.map_err(unreachable)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        Self::handshake(
            &mut send,
            &mut recv,
            Hello {
                headers,
                client_id: session_id.clone(),
            },
            config.handshake_timeout_ms,
        )
        .await?;

        info!(%session_id, %server_addr, "daemon session established");

        Ok(Self {
            session_id,
            target,
            client,
            connection,
            send: Mutex::new(Some(send)),
            recv: Mutex::new(Some(recv)),
            closed: CancellationToken::new(),
        })
    }

    async fn handshake(
        send: &mut FramedStream<SendStream>,
        recv: &mut FramedStream<RecvStream>,
        hello: Hello,
        timeout_ms: u64,
    ) -> Result<(), SessionError> {
        send.write_frame(&Frame::hello(&hello)?).await?;

        let frame = tokio::time::timeout(Duration::from_millis(timeout_ms), recv.read_frame())
            .await
            .map_err(|_| SessionError::HandshakeTimeout(timeout_ms))??;

        if frame.message_type != MessageType::HelloAck {
            return Err(SessionError::Protocol(format!(
                "expected HelloAck, got {:?}",
                frame.message_type
            )));
        }

        let ack: HelloAck = frame.decode()?;
        if !ack.accepted {
            warn!(reason = %ack.reason, "daemon refused the session");
            return Err(SessionError::Refused(ack.reason));
        }
        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Start the receive path, delivering inbound events to `registry`.
    ///
    /// Handlers should be registered before this is called; events for
    /// identities without handlers are dropped. Cancelling [`DaemonChannel::closed`]
    /// ends the receive path and closes the connection.
    pub async fn start(&self, registry: Arc<EventRegistry>) -> Result<(), SessionError> {
        let recv = self
            .recv
            .lock()
            .await
            .take()
            .ok_or(SessionError::AlreadyStarted)?;

        let closed = self.closed.clone();
        let session_id = self.session_id.clone();
        let connection = self.connection.clone();
        tokio::spawn(async move {
            receive_loop(recv, registry, closed.clone(), &session_id).await;
            closed.cancel();
            connection.close(CLOSE_NORMAL, b"session ended");
        });
        Ok(())
    }
}

#[instrument(skip(recv, registry, closed))]
async fn receive_loop(
    mut recv: FramedStream<RecvStream>,
    registry: Arc<EventRegistry>,
    closed: CancellationToken,
    session_id: &str,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => {
                debug!("receive path cancelled");
                return;
            }
            frame = recv.read_frame() => frame,
        };

        match frame {
            Ok(frame) => match frame.message_type {
                MessageType::Event => {
                    let message = match frame.decode::<DaemonEvent>() {
                        Ok(event) => decode_event(event),
                        Err(e) => Err(e.into()),
                    };
                    match message {
                        Ok(message) => {
                            if let Err(e) = registry.fire_event(&message) {
                                warn!(error = %e, "event dispatch failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable event"),
                    }
                }
                MessageType::Close => {
                    info!("daemon closed the session");
                    return;
                }
                other => warn!(message_type = ?other, "unexpected frame from daemon"),
            },
            Err(FrameError::ConnectionClosed) => {
                info!("daemon stream ended");
                return;
            }
            Err(e) => {
                error!(error = %e, "daemon connection failed");
                return;
            }
        }
    }
}

#[async_trait]
impl DaemonChannel for DaemonSession {
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn send_message(&self, message: &StopMessage) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let mut guard = self.send.lock().await;
        let send = guard.as_mut().ok_or(SessionError::Closed)?;
        send.write_frame(&Frame::control(&encode_stop(message))?)
            .await?;
        debug!(safe_stop = message.safe_stop, "stop request sent");
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        if let Some(mut send) = self.send.lock().await.take() {
            // Best effort; the daemon may already be gone
            let _ = send.write_frame(&Frame::close()).await;
            let _ = send.get_mut().finish();
        }
        self.closed.cancel();
        self.client.close().await;
        info!(session_id = %self.session_id, "daemon session closed");
    }
}

impl std::fmt::Debug for DaemonSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonSession")
            .field("session_id", &self.session_id)
            .field("target", &self.target)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}
