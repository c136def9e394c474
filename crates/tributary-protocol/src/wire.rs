// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf messages exchanged over a daemon session.
//!
//! Declared directly with the prost derive macros; field tags are part of
//! the wire contract and must never be reused.

use std::collections::HashMap;

/// Client handshake, sent once as the first frame of a session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
    /// Handshake metadata (authentication token, connection mode, ...)
    #[prost(map = "string, string", tag = "1")]
    pub headers: HashMap<String, String>,
    /// Client-generated session identifier, used in daemon-side logs
    #[prost(string, tag = "2")]
    pub client_id: String,
}

/// Daemon reply to `Hello`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloAck {
    #[prost(bool, tag = "1")]
    pub accepted: bool,
    /// Refusal reason when `accepted` is false
    #[prost(string, tag = "2")]
    pub reason: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ModelType {
    Unspecified = 0,
    Operation = 1,
    Transformation = 2,
}

/// Routing identity of a daemon-originated event.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct RemoteSource {
    #[prost(enumeration = "ModelType", tag = "1")]
    pub model_type: i32,
    #[prost(string, tag = "2")]
    pub id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LogLevel {
    Unspecified = 0,
    Nothing = 1,
    Error = 2,
    Minimal = 3,
    Basic = 4,
    Detailed = 5,
    Debug = 6,
    Rowlevel = 7,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEntry {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(enumeration = "LogLevel", tag = "2")]
    pub level: i32,
    #[prost(int64, tag = "3")]
    pub timestamp_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEvent {
    #[prost(message, optional, tag = "1")]
    pub source: Option<RemoteSource>,
    #[prost(message, optional, tag = "2")]
    pub entry: Option<LogEntry>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metrics {
    #[prost(int64, tag = "1")]
    pub entries_in: i64,
    #[prost(int64, tag = "2")]
    pub entries_out: i64,
    #[prost(int64, tag = "3")]
    pub dropped: i64,
    #[prost(int64, tag = "4")]
    pub in_flight: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricsEvent {
    #[prost(message, optional, tag = "1")]
    pub source: Option<RemoteSource>,
    #[prost(message, optional, tag = "2")]
    pub metrics: Option<Metrics>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ExecutionState {
    Unspecified = 0,
    Running = 1,
    Paused = 2,
    Finished = 3,
    Stopped = 4,
    Failed = 5,
}

/// Status of one step of a nested execution, reported through its parent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StepStatusReport {
    #[prost(string, tag = "1")]
    pub step_name: String,
    #[prost(int32, tag = "2")]
    pub copy_nr: i32,
    #[prost(int64, tag = "3")]
    pub lines_read: i64,
    #[prost(int64, tag = "4")]
    pub lines_written: i64,
    #[prost(int64, tag = "5")]
    pub lines_input: i64,
    #[prost(int64, tag = "6")]
    pub lines_output: i64,
    #[prost(int64, tag = "7")]
    pub lines_updated: i64,
    #[prost(int64, tag = "8")]
    pub lines_rejected: i64,
    #[prost(int64, tag = "9")]
    pub errors: i64,
    #[prost(string, tag = "10")]
    pub status_description: String,
    #[prost(double, tag = "11")]
    pub seconds: f64,
    #[prost(bool, tag = "12")]
    pub stopped: bool,
    #[prost(bool, tag = "13")]
    pub paused: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusEvent {
    #[prost(message, optional, tag = "1")]
    pub source: Option<RemoteSource>,
    #[prost(oneof = "status_event::Report", tags = "2, 3")]
    pub report: Option<status_event::Report>,
}

/// Nested message and enum types in `StatusEvent`.
pub mod status_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Report {
        #[prost(enumeration = "super::ExecutionState", tag = "2")]
        State(i32),
        #[prost(message, tag = "3")]
        SubStatus(super::StepStatusReport),
    }
}

/// Cooperative or immediate cancellation request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopMessage {
    #[prost(string, tag = "1")]
    pub reason_phrase: String,
    #[prost(bool, tag = "2")]
    pub safe_stop: bool,
}

/// Envelope for every daemon-to-client `Event` frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DaemonEvent {
    #[prost(oneof = "daemon_event::Event", tags = "1, 2, 3, 4")]
    pub event: Option<daemon_event::Event>,
}

/// Nested message and enum types in `DaemonEvent`.
pub mod daemon_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        Log(super::LogEvent),
        #[prost(message, tag = "2")]
        Metrics(super::MetricsEvent),
        #[prost(message, tag = "3")]
        Status(super::StatusEvent),
        #[prost(message, tag = "4")]
        Stop(super::StopMessage),
    }
}

/// Envelope for every client-to-daemon `Control` frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ControlMessage {
    #[prost(oneof = "control_message::Control", tags = "1")]
    pub control: Option<control_message::Control>,
}

/// Nested message and enum types in `ControlMessage`.
pub mod control_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Control {
        #[prost(message, tag = "1")]
        Stop(super::StopMessage),
    }
}
