// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Length-prefixed framing for the session stream.
//!
//! ```text
//! +----------------+--------------+---------------------+
//! | length: u32 BE | type: u16 BE | protobuf payload... |
//! +----------------+--------------+---------------------+
//! ```
//!
//! `length` counts payload bytes only.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted payload, 16 MiB.
pub const MAX_FRAME_SIZE: usize = 16 << 20;

/// Bytes in front of every payload.
pub const HEADER_SIZE: usize = 6;

/// Frame kinds. The discriminant is the on-wire type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Client handshake
    Hello = 1,
    HelloAck = 2,
    /// Daemon to client: log, metrics, status or stop
    Event = 3,
    /// Client to daemon: stop requests
    Control = 4,
    /// End of session, no payload
    Close = 5,
}

impl MessageType {
    const ALL: [MessageType; 5] = [
        MessageType::Hello,
        MessageType::HelloAck,
        MessageType::Event,
        MessageType::Control,
        MessageType::Close,
    ];
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(code: u16) -> Result<Self, FrameError> {
        Self::ALL
            .into_iter()
            .find(|kind| *kind as u16 == code)
            .ok_or(FrameError::InvalidMessageType(code))
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (limit {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("unknown frame type {0}")]
    InvalidMessageType(u16),

    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed payload: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Parsed and validated frame header.
#[derive(Debug, Clone, Copy)]
struct Header {
    length: usize,
    message_type: MessageType,
}

impl Header {
    fn parse(mut raw: impl Buf) -> Result<Self, FrameError> {
        let length = raw.get_u32() as usize;
        let message_type = MessageType::try_from(raw.get_u16())?;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }
        Ok(Self {
            length,
            message_type,
        })
    }
}

/// One typed frame with its still-encoded payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Encode `message` as the payload of a `message_type` frame.
    pub fn new<M: Message>(message_type: MessageType, message: &M) -> Result<Self, FrameError> {
        let size = message.encoded_len();
        if size > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(size));
        }
        Ok(Self {
            message_type,
            payload: Bytes::from(message.encode_to_vec()),
        })
    }

    pub fn hello<M: Message>(message: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Hello, message)
    }

    pub fn hello_ack<M: Message>(message: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::HelloAck, message)
    }

    pub fn event<M: Message>(message: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Event, message)
    }

    pub fn control<M: Message>(message: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Control, message)
    }

    pub fn close() -> Self {
        Self {
            message_type: MessageType::Close,
            payload: Bytes::new(),
        }
    }

    /// Decode the payload as `M`.
    pub fn decode<M: Message + Default>(&self) -> Result<M, FrameError> {
        Ok(M::decode(self.payload.as_ref())?)
    }

    /// Header and payload as one buffer.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        out.put_u32(self.payload.len() as u32);
        out.put_u16(self.message_type as u16);
        out.extend_from_slice(&self.payload);
        out.freeze()
    }

    /// Parse one frame from the front of `bytes`. Trailing bytes are ignored.
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated("header"));
        }
        let header = Header::parse(bytes.split_to(HEADER_SIZE))?;
        if bytes.len() < header.length {
            return Err(FrameError::Truncated("payload"));
        }
        Ok(Self {
            message_type: header.message_type,
            payload: bytes.split_to(header.length),
        })
    }
}

/// Frame reader or writer over one half of a session stream.
#[derive(Debug)]
pub struct FramedStream<S> {
    inner: S,
}

impl<S> FramedStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped stream, e.g. to finish a QUIC send half.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Next frame. A stream ending on a frame boundary yields
    /// [`FrameError::ConnectionClosed`].
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        let mut raw = [0u8; HEADER_SIZE];
        if let Err(e) = self.inner.read_exact(&mut raw).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
                _ => e.into(),
            });
        }
        let header = Header::parse(&raw[..])?;

        let mut payload = BytesMut::zeroed(header.length);
        self.inner.read_exact(&mut payload).await?;
        Ok(Frame {
            message_type: header.message_type,
            payload: payload.freeze(),
        })
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        self.inner.write_all(&frame.encode()).await?;
        Ok(())
    }
}
