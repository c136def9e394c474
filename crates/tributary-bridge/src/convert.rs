// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversions between wire messages and bridge messages.

use chrono::{DateTime, Utc};
use tributary_protocol::wire;

use crate::error::SessionError;
use crate::types::{
    ExecutionState, LogEntry, LogLevel, Message, Metrics, ModelType, RemoteSource, StatusReport,
    StepStatus, StopMessage,
};

fn protocol(reason: impl Into<String>) -> SessionError {
    SessionError::Protocol(reason.into())
}

// Negative counters are treated as zero.
fn count(value: i64) -> u64 {
    value.max(0) as u64
}

// Counters past the wire range saturate.
fn wire_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn source_from_wire(source: Option<wire::RemoteSource>) -> Result<RemoteSource, SessionError> {
    let source = source.ok_or_else(|| protocol("event without source"))?;
    let model_type = match wire::ModelType::try_from(source.model_type) {
        Ok(wire::ModelType::Operation) => ModelType::Operation,
        Ok(wire::ModelType::Transformation) => ModelType::Transformation,
        Ok(wire::ModelType::Unspecified) | Err(_) => {
            return Err(protocol(format!(
                "unknown model type {} for source {:?}",
                source.model_type, source.id
            )));
        }
    };
    Ok(RemoteSource::new(model_type, source.id))
}

fn source_to_wire(source: &RemoteSource) -> wire::RemoteSource {
    let model_type = match source.model_type {
        ModelType::Operation => wire::ModelType::Operation,
        ModelType::Transformation => wire::ModelType::Transformation,
    };
    wire::RemoteSource {
        model_type: model_type.into(),
        id: source.id.clone(),
    }
}

/// Unspecified or unknown levels fall back to `Basic`, the runtime default.
fn level_from_wire(level: i32) -> LogLevel {
    match wire::LogLevel::try_from(level) {
        Ok(wire::LogLevel::Nothing) => LogLevel::Nothing,
        Ok(wire::LogLevel::Error) => LogLevel::Error,
        Ok(wire::LogLevel::Minimal) => LogLevel::Minimal,
        Ok(wire::LogLevel::Detailed) => LogLevel::Detailed,
        Ok(wire::LogLevel::Debug) => LogLevel::Debug,
        Ok(wire::LogLevel::Rowlevel) => LogLevel::Rowlevel,
        Ok(wire::LogLevel::Basic) | Ok(wire::LogLevel::Unspecified) | Err(_) => LogLevel::Basic,
    }
}

fn level_to_wire(level: LogLevel) -> wire::LogLevel {
    match level {
        LogLevel::Nothing => wire::LogLevel::Nothing,
        LogLevel::Error => wire::LogLevel::Error,
        LogLevel::Minimal => wire::LogLevel::Minimal,
        LogLevel::Basic => wire::LogLevel::Basic,
        LogLevel::Detailed => wire::LogLevel::Detailed,
        LogLevel::Debug => wire::LogLevel::Debug,
        LogLevel::Rowlevel => wire::LogLevel::Rowlevel,
    }
}

fn state_from_wire(state: i32) -> Result<ExecutionState, SessionError> {
    match wire::ExecutionState::try_from(state) {
        Ok(wire::ExecutionState::Running) => Ok(ExecutionState::Running),
        Ok(wire::ExecutionState::Paused) => Ok(ExecutionState::Paused),
        Ok(wire::ExecutionState::Finished) => Ok(ExecutionState::Finished),
        Ok(wire::ExecutionState::Stopped) => Ok(ExecutionState::Stopped),
        Ok(wire::ExecutionState::Failed) => Ok(ExecutionState::Failed),
        Ok(wire::ExecutionState::Unspecified) | Err(_) => {
            Err(protocol(format!("unknown execution state {}", state)))
        }
    }
}

fn state_to_wire(state: ExecutionState) -> wire::ExecutionState {
    match state {
        ExecutionState::Running => wire::ExecutionState::Running,
        ExecutionState::Paused => wire::ExecutionState::Paused,
        ExecutionState::Finished => wire::ExecutionState::Finished,
        ExecutionState::Stopped => wire::ExecutionState::Stopped,
        ExecutionState::Failed => wire::ExecutionState::Failed,
    }
}

fn step_status_from_wire(report: wire::StepStatusReport) -> StepStatus {
    StepStatus {
        step_name: report.step_name,
        copy: report.copy_nr.max(0) as u32,
        lines_read: count(report.lines_read),
        lines_written: count(report.lines_written),
        lines_input: count(report.lines_input),
        lines_output: count(report.lines_output),
        lines_updated: count(report.lines_updated),
        lines_rejected: count(report.lines_rejected),
        errors: count(report.errors),
        status_description: report.status_description,
        seconds: report.seconds,
        stopped: report.stopped,
        paused: report.paused,
    }
}

fn step_status_to_wire(status: &StepStatus) -> wire::StepStatusReport {
    wire::StepStatusReport {
        step_name: status.step_name.clone(),
        copy_nr: status.copy as i32,
        lines_read: wire_count(status.lines_read),
        lines_written: wire_count(status.lines_written),
        lines_input: wire_count(status.lines_input),
        lines_output: wire_count(status.lines_output),
        lines_updated: wire_count(status.lines_updated),
        lines_rejected: wire_count(status.lines_rejected),
        errors: wire_count(status.errors),
        status_description: status.status_description.clone(),
        seconds: status.seconds,
        stopped: status.stopped,
        paused: status.paused,
    }
}

/// Decode a daemon event into a routable message.
pub fn decode_event(event: wire::DaemonEvent) -> Result<Message, SessionError> {
    use wire::daemon_event::Event;

    match event.event.ok_or_else(|| protocol("empty daemon event"))? {
        Event::Log(log) => {
            let source = source_from_wire(log.source)?;
            let entry = log.entry.ok_or_else(|| protocol("log event without entry"))?;
            let timestamp =
                DateTime::<Utc>::from_timestamp_millis(entry.timestamp_ms).unwrap_or_else(Utc::now);
            Ok(Message::Log {
                source,
                entry: LogEntry {
                    message: entry.message,
                    level: level_from_wire(entry.level),
                    timestamp,
                },
            })
        }
        Event::Metrics(metrics) => {
            let source = source_from_wire(metrics.source)?;
            let payload = metrics.metrics.unwrap_or_default();
            Ok(Message::Metrics {
                source,
                metrics: Metrics {
                    entries_in: count(payload.entries_in),
                    entries_out: count(payload.entries_out),
                    dropped: count(payload.dropped),
                    in_flight: count(payload.in_flight),
                },
            })
        }
        Event::Status(status) => {
            use wire::status_event::Report;

            let source = source_from_wire(status.source)?;
            let report = match status
                .report
                .ok_or_else(|| protocol("status event without report"))?
            {
                Report::State(state) => StatusReport::State(state_from_wire(state)?),
                Report::SubStatus(report) => StatusReport::SubStatus(step_status_from_wire(report)),
            };
            Ok(Message::Status { source, report })
        }
        Event::Stop(stop) => Ok(Message::Stop(StopMessage {
            reason_phrase: stop.reason_phrase,
            safe_stop: stop.safe_stop,
        })),
    }
}

/// Encode a message as the daemon would send it.
pub fn encode_event(message: &Message) -> wire::DaemonEvent {
    use wire::daemon_event::Event;

    let event = match message {
        Message::Log { source, entry } => Event::Log(wire::LogEvent {
            source: Some(source_to_wire(source)),
            entry: Some(wire::LogEntry {
                message: entry.message.clone(),
                level: level_to_wire(entry.level).into(),
                timestamp_ms: entry.timestamp.timestamp_millis(),
            }),
        }),
        Message::Metrics { source, metrics } => Event::Metrics(wire::MetricsEvent {
            source: Some(source_to_wire(source)),
            metrics: Some(wire::Metrics {
                entries_in: wire_count(metrics.entries_in),
                entries_out: wire_count(metrics.entries_out),
                dropped: wire_count(metrics.dropped),
                in_flight: wire_count(metrics.in_flight),
            }),
        }),
        Message::Status { source, report } => {
            use wire::status_event::Report;

            let report = match report {
                StatusReport::State(state) => Report::State(state_to_wire(*state).into()),
                StatusReport::SubStatus(status) => Report::SubStatus(step_status_to_wire(status)),
            };
            Event::Status(wire::StatusEvent {
                source: Some(source_to_wire(source)),
                report: Some(report),
            })
        }
        Message::Stop(stop) => Event::Stop(stop_to_wire(stop)),
    };

    wire::DaemonEvent { event: Some(event) }
}

fn stop_to_wire(stop: &StopMessage) -> wire::StopMessage {
    wire::StopMessage {
        reason_phrase: stop.reason_phrase.clone(),
        safe_stop: stop.safe_stop,
    }
}

/// Wrap a stop request in the control envelope sent to the daemon.
pub fn encode_stop(stop: &StopMessage) -> wire::ControlMessage {
    wire::ControlMessage {
        control: Some(wire::control_message::Control::Stop(stop_to_wire(stop))),
    }
}

/// Extract the stop request from a control envelope.
pub fn decode_control(control: wire::ControlMessage) -> Result<StopMessage, SessionError> {
    match control.control {
        Some(wire::control_message::Control::Stop(stop)) => Ok(StopMessage {
            reason_phrase: stop.reason_phrase,
            safe_stop: stop.safe_stop,
        }),
        None => Err(protocol("empty control message")),
    }
}
