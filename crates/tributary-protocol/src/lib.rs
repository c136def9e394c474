// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire layer between a local pipeline runtime and a remote execution
//! daemon: QUIC transport, length-prefixed frames and Protobuf messages.
//!
//! A session occupies one bidirectional stream on a QUIC connection:
//!
//! 1. the client opens the stream and writes `Hello` with its handshake
//!    headers, authentication token included;
//! 2. the daemon answers `HelloAck`, accepting or refusing with a reason;
//! 3. afterwards the daemon pushes `Event` frames (log, metrics, status,
//!    stop) and the client writes `Control` frames carrying stop requests;
//! 4. either side ends the session with an empty `Close` frame.
//!
//! ```ignore
//! use tributary_protocol::{DaemonClient, Frame, wire};
//!
//! let client = DaemonClient::localhost()?;
//! let (mut send, mut recv) = client.open_duplex().await?;
//! send.write_frame(&Frame::hello(&wire::Hello::default())?).await?;
//! let ack: wire::HelloAck = recv.read_frame().await?.decode()?;
//! ```

pub mod client;
pub mod frame;
pub mod server;
pub mod transport;
pub mod wire;

pub use client::{ClientError, DaemonClient, DaemonClientConfig};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use server::{DaemonConnection, DaemonServer, DaemonServerConfig, ServerError};
pub use transport::TlsError;
