// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messages routed through the bridge and the identities they are routed by.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of remote model an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// One step of a pipeline, as executed by the daemon
    Operation,
    /// A whole pipeline
    Transformation,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Operation => f.write_str("operation"),
            ModelType::Transformation => f.write_str("transformation"),
        }
    }
}

/// Routing identity of a daemon-originated event.
///
/// Both fields take part in equality: `(Operation, "x")` and
/// `(Transformation, "x")` are different identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteSource {
    pub model_type: ModelType,
    pub id: String,
}

impl RemoteSource {
    pub fn new(model_type: ModelType, id: impl Into<String>) -> Self {
        Self {
            model_type,
            id: id.into(),
        }
    }

    pub fn operation(id: impl Into<String>) -> Self {
        Self::new(ModelType::Operation, id)
    }

    pub fn transformation(id: impl Into<String>) -> Self {
        Self::new(ModelType::Transformation, id)
    }

    /// An identity with an empty correlation id can never be routed.
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty()
    }
}

impl fmt::Display for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_type, self.id)
    }
}

/// Log levels of the pipeline runtime, most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Nothing,
    Error,
    Minimal,
    Basic,
    Detailed,
    Debug,
    Rowlevel,
}

impl LogLevel {
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

/// Row counters reported for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub entries_in: u64,
    pub entries_out: u64,
    pub dropped: u64,
    /// Rows currently buffered between this operation and the next
    pub in_flight: u64,
}

/// Execution state reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Paused,
    Finished,
    Stopped,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Finished | ExecutionState::Stopped | ExecutionState::Failed
        )
    }
}

/// Status of one step of a nested execution, surfaced through its parent step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepStatus {
    pub step_name: String,
    pub copy: u32,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_input: u64,
    pub lines_output: u64,
    pub lines_updated: u64,
    pub lines_rejected: u64,
    pub errors: u64,
    pub status_description: String,
    pub seconds: f64,
    pub stopped: bool,
    pub paused: bool,
}

impl StepStatus {
    pub fn new(step_name: impl Into<String>, copy: u32) -> Self {
        Self {
            step_name: step_name.into(),
            copy,
            ..Default::default()
        }
    }

    /// Two reports describe the same nested step when name and copy match.
    pub fn same_step(&self, other: &StepStatus) -> bool {
        self.step_name == other.step_name && self.copy == other.copy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusReport {
    State(ExecutionState),
    SubStatus(StepStatus),
}

/// Request to stop remote work. The only message the bridge ever sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopMessage {
    pub reason_phrase: String,
    pub safe_stop: bool,
}

impl StopMessage {
    /// Cooperative stop: running work is asked to wind down.
    pub fn safe(reason: impl Into<String>) -> Self {
        Self {
            reason_phrase: reason.into(),
            safe_stop: true,
        }
    }

    pub fn immediate(reason: impl Into<String>) -> Self {
        Self {
            reason_phrase: reason.into(),
            safe_stop: false,
        }
    }
}

/// Envelope delivered through the event registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Log {
        source: RemoteSource,
        entry: LogEntry,
    },
    Metrics {
        source: RemoteSource,
        metrics: Metrics,
    },
    Status {
        source: RemoteSource,
        report: StatusReport,
    },
    Stop(StopMessage),
}

impl Message {
    /// Routing identity of this message.
    ///
    /// Stop messages carry no source and share a single key regardless of
    /// their reason phrase, so a stop reaches every stop listener.
    pub fn key(&self) -> EventKey {
        match self {
            Message::Log { source, .. } => EventKey::Log(source.clone()),
            Message::Metrics { source, .. } => EventKey::Metrics(source.clone()),
            Message::Status { source, .. } => EventKey::Status(source.clone()),
            Message::Stop(_) => EventKey::Stop,
        }
    }

    pub fn source(&self) -> Option<&RemoteSource> {
        match self {
            Message::Log { source, .. }
            | Message::Metrics { source, .. }
            | Message::Status { source, .. } => Some(source),
            Message::Stop(_) => None,
        }
    }
}

/// Identity handlers are registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Log(RemoteSource),
    Metrics(RemoteSource),
    Status(RemoteSource),
    Stop,
}

impl EventKey {
    pub fn source(&self) -> Option<&RemoteSource> {
        match self {
            EventKey::Log(source) | EventKey::Metrics(source) | EventKey::Status(source) => {
                Some(source)
            }
            EventKey::Stop => None,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.source().is_none_or(RemoteSource::is_well_formed)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKey::Log(source) => write!(f, "log({})", source),
            EventKey::Metrics(source) => write!(f, "metrics({})", source),
            EventKey::Status(source) => write!(f, "status({})", source),
            EventKey::Stop => f.write_str("stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_differ_by_model_type() {
        let op = RemoteSource::operation("x");
        let trans = RemoteSource::transformation("x");
        assert_ne!(op, trans);
        assert_eq!(op, RemoteSource::operation("x"));
    }

    #[test]
    fn test_stop_key_ignores_reason() {
        let a = Message::Stop(StopMessage::safe("one"));
        let b = Message::Stop(StopMessage::immediate("two"));
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), EventKey::Stop);
        assert!(a.source().is_none());
    }

    #[test]
    fn test_key_carries_message_kind() {
        let source = RemoteSource::operation("op1");
        let log = Message::Log {
            source: source.clone(),
            entry: LogEntry::error("bad row"),
        };
        let metrics = Message::Metrics {
            source: source.clone(),
            metrics: Metrics::default(),
        };
        assert_eq!(log.key(), EventKey::Log(source.clone()));
        assert_ne!(log.key(), metrics.key());
        assert_eq!(log.key().to_string(), "log(operation:op1)");
    }

    #[test]
    fn test_empty_id_is_malformed() {
        assert!(!EventKey::Status(RemoteSource::operation("")).is_well_formed());
        assert!(EventKey::Stop.is_well_formed());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionState::Running.is_terminal());
        assert!(!ExecutionState::Paused.is_terminal());
        assert!(ExecutionState::Finished.is_terminal());
        assert!(ExecutionState::Stopped.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
    }

    #[test]
    fn test_message_serializes_with_kind_tag() {
        let msg = Message::Stop(StopMessage::safe("done"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "stop");
        assert_eq!(json["reason_phrase"], "done");
        assert_eq!(json["safe_stop"], true);
    }
}
