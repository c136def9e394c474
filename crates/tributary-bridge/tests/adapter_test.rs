// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine adapter tests driven through the event registry.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{RecordingChannel, prepared_execution, two_step_pipeline};
use tokio_util::sync::CancellationToken;
use tributary_bridge::{
    EventKey, EventRegistry, ExecutionError, ExecutionState, FnHandler, LogEntry, LogLevel,
    Message, Metrics, PipelineDescriptor, RemoteExecution, RemoteSource, RemoteStepData,
    StatusReport, StepDescriptor, StepExecutionStatus, StepStatus, StopMessage,
};

fn state(source: RemoteSource, state: ExecutionState) -> Message {
    Message::Status {
        source,
        report: StatusReport::State(state),
    }
}

fn sub_status(source: RemoteSource, step: &str, lines_read: u64) -> Message {
    let mut status = StepStatus::new(step, 0);
    status.lines_read = lines_read;
    status.status_description = "Running".to_string();
    Message::Status {
        source,
        report: StatusReport::SubStatus(status),
    }
}

fn error_log(source: RemoteSource) -> Message {
    Message::Log {
        source,
        entry: LogEntry::error("lookup failed"),
    }
}

fn op(id: &str) -> RemoteSource {
    RemoteSource::operation(id)
}

#[test]
fn test_step_data_initial_state() {
    let data = RemoteStepData::new();
    assert_eq!(data.status(), StepExecutionStatus::Init);
    assert!(data.is_initialising());
    assert!(!data.is_running());
    assert!(!data.is_idle());
    assert!(!data.is_disposed());
    assert!(!data.is_finished());
    assert!(!data.is_empty());
}

#[test]
fn test_prepare_registers_three_handlers_per_step() {
    let descriptor = two_step_pipeline().with_step(StepDescriptor::new("Lookup", "op3").with_copies(3));
    let (execution, registry, _channel) = prepared_execution(descriptor);

    assert_eq!(execution.steps().len(), 5);
    // Three keys per step copy plus the pipeline's status and log keys
    assert_eq!(registry.len(), 5 * 3 + 2);
    for copy in execution.find_step_interfaces("Lookup") {
        for key in [
            EventKey::Status(copy.source().clone()),
            EventKey::Log(copy.source().clone()),
            EventKey::Metrics(copy.source().clone()),
        ] {
            assert_eq!(registry.handlers_for(&key).len(), 1);
        }
    }
    assert_eq!(
        execution.step_interface("Lookup", 2).unwrap().source(),
        &op("op3.2")
    );
    assert!(execution.step_interface("Lookup", 3).is_none());
    assert_eq!(execution.status(), "Initializing");

    assert!(matches!(
        execution.prepare_execution(),
        Err(ExecutionError::AlreadyPrepared)
    ));
}

#[test]
fn test_failed_preparation_leaves_registry_untouched() {
    let registry = Arc::new(EventRegistry::new());
    registry
        .add_handler(
            EventKey::Metrics(op("op1")),
            FnHandler::shared("Read.0:metrics", |_| Ok(())),
        )
        .unwrap();

    let execution = RemoteExecution::new(
        two_step_pipeline(),
        Arc::clone(&registry),
        RecordingChannel::new(),
    )
    .unwrap();

    assert!(matches!(
        execution.prepare_execution(),
        Err(ExecutionError::Registry(_))
    ));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.handlers_for(&EventKey::Metrics(op("op1"))).len(), 1);
    assert!(execution.steps().is_empty());
}

#[test]
fn test_invalid_descriptor_is_rejected() {
    let result = RemoteExecution::new(
        PipelineDescriptor::new("p1", "empty"),
        Arc::new(EventRegistry::new()),
        RecordingChannel::new(),
    );
    assert!(matches!(result, Err(ExecutionError::InvalidDescriptor(_))));
}

#[test]
fn test_error_log_reaches_every_handler_in_order() {
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    let calls = Arc::new(Mutex::new(Vec::new()));
    for id in ["A", "B"] {
        let calls = Arc::clone(&calls);
        registry
            .add_handler(
                EventKey::Log(op("op1")),
                FnHandler::shared(id, move |_| {
                    calls.lock().unwrap().push(id);
                    Ok(())
                }),
            )
            .unwrap();
    }

    registry.fire_event(&error_log(op("op1"))).unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["A", "B"]);
    let step = execution.step_interface("Read", 0).unwrap();
    assert_eq!(step.errors(), 1);
    assert!(step.is_stopped());
    // The status enum is not touched by a log event
    assert_eq!(step.data().status(), StepExecutionStatus::Init);

    let other = execution.step_interface("Write", 0).unwrap();
    assert_eq!(other.errors(), 0);
    assert!(!other.is_stopped());
}

#[test]
fn test_non_error_log_changes_nothing() {
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    registry
        .fire_event(&Message::Log {
            source: op("op1"),
            entry: LogEntry::new(LogLevel::Detailed, "10000 rows"),
        })
        .unwrap();

    let step = execution.step_interface("Read", 0).unwrap();
    assert_eq!(step.errors(), 0);
    assert!(!step.is_stopped());
    assert_eq!(step.status(), StepExecutionStatus::Init);
}

#[test]
fn test_sub_statuses_collect_on_fan_out_step() {
    let descriptor = two_step_pipeline().with_step(StepDescriptor::new("Enrich", "op3"));
    let (execution, registry, _channel) = prepared_execution(descriptor);

    registry.fire_event(&sub_status(op("op3"), "Lookup customer", 10)).unwrap();
    registry.fire_event(&sub_status(op("op3"), "Merge rows", 5)).unwrap();
    // A later report replaces the earlier one in place
    registry.fire_event(&sub_status(op("op3"), "Lookup customer", 25)).unwrap();

    let fan_out = execution.step_interface("Enrich", 0).unwrap();
    let statuses = fan_out.sub_statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].step_name, "Lookup customer");
    assert_eq!(statuses[0].lines_read, 25);
    assert_eq!(statuses[1].step_name, "Merge rows");

    assert!(execution.step_interface("Read", 0).unwrap().sub_statuses().is_empty());
    assert!(execution.step_interface("Write", 0).unwrap().sub_statuses().is_empty());
}

#[test]
fn test_metrics_update_line_counters() {
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    registry
        .fire_event(&Message::Metrics {
            source: op("op1"),
            metrics: Metrics {
                entries_in: 120,
                entries_out: 100,
                dropped: 20,
                in_flight: 0,
            },
        })
        .unwrap();
    registry
        .fire_event(&Message::Metrics {
            source: op("op2"),
            metrics: Metrics {
                entries_in: 100,
                entries_out: 100,
                dropped: 0,
                in_flight: 3,
            },
        })
        .unwrap();

    let read = execution.step_interface("Read", 0).unwrap();
    assert_eq!(read.lines_read(), 120);
    assert_eq!(read.lines_output(), 100);
    assert_eq!(read.lines_rejected(), 20);
    assert!(read.data().is_empty());
    assert!(!execution.step_interface("Write", 0).unwrap().data().is_empty());

    let result = execution.result();
    assert_eq!(result.lines_read, 220);
    assert_eq!(result.lines_written, 200);
    assert_eq!(result.lines_rejected, 20);
    assert_eq!(result.nr_errors, 0);
}

#[tokio::test]
async fn test_safe_stop_marks_steps_halting_before_waiting() {
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    registry.fire_event(&state(op("op2"), ExecutionState::Running)).unwrap();

    let stopped = execution.safe_stop("user requested").await.unwrap();

    assert_eq!(stopped, 2);
    let sent = channel.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.safe_stop && m.reason_phrase == "user requested"));
    for step in execution.steps() {
        assert_eq!(step.status_description(), "Halting");
        assert!(step.is_safe_stopped());
        assert_eq!(step.data().status(), StepExecutionStatus::Halting);
    }

    // A late running report does not undo the local transition
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    assert_eq!(
        execution.step_interface("Read", 0).unwrap().data().status(),
        StepExecutionStatus::Halting
    );

    // Already safe-stopped steps are not asked again
    assert_eq!(execution.safe_stop("again").await.unwrap(), 0);
    assert_eq!(channel.sent().len(), 2);
}

#[tokio::test]
async fn test_safe_stop_skips_idle_steps() {
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op2"), ExecutionState::Running)).unwrap();

    assert_eq!(execution.safe_stop("done").await.unwrap(), 1);
    assert_eq!(channel.sent().len(), 1);
    assert_eq!(
        execution.step_interface("Read", 0).unwrap().status_description(),
        "Initializing"
    );
    assert_eq!(
        execution.step_interface("Write", 0).unwrap().status_description(),
        "Halting"
    );
}

#[tokio::test]
async fn test_safe_stop_reports_send_failure_after_local_transition() {
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    registry.fire_event(&state(op("op2"), ExecutionState::Running)).unwrap();
    channel.fail_sends();

    let result = execution.safe_stop("user requested").await;

    assert!(matches!(result, Err(ExecutionError::Session(_))));
    for step in execution.steps() {
        assert_eq!(step.status_description(), "Halting");
    }
}

#[tokio::test]
async fn test_single_step_stops() {
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    registry.fire_event(&state(op("op2"), ExecutionState::Running)).unwrap();
    let read = execution.step_interface("Read", 0).unwrap();
    let write = execution.step_interface("Write", 0).unwrap();

    read.safe_stop("drain").await.unwrap();
    assert_eq!(read.status(), StepExecutionStatus::Halting);
    assert!(read.is_safe_stopped());
    assert_eq!(write.status(), StepExecutionStatus::Running);

    write.stop("abort").await.unwrap();
    assert_eq!(write.status(), StepExecutionStatus::Halting);
    assert!(write.is_stopped());
    assert!(!write.is_safe_stopped());

    assert_eq!(
        channel.sent(),
        vec![StopMessage::safe("drain"), StopMessage::immediate("abort")]
    );

    // The daemon confirms the stop
    registry.fire_event(&state(op("op2"), ExecutionState::Stopped)).unwrap();
    assert_eq!(write.status_description(), "Finished");
    assert!(write.is_stopped());

    // Local transition survives a failed send
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    channel.fail_sends();
    let read = execution.step_interface("Read", 0).unwrap();
    assert!(read.stop("abort").await.is_err());
    assert_eq!(read.status_description(), "Halting");
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn test_stop_all_sends_one_immediate_stop() {
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();

    execution.stop_all("abort").await.unwrap();

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].safe_stop);
    assert!(execution.steps().iter().all(|step| step.is_stopped()));
    assert!(!execution.step_interface("Read", 0).unwrap().is_safe_stopped());
}

#[test]
fn test_step_state_mapping() {
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    let step = execution.step_interface("Read", 0).unwrap();

    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    assert!(step.is_running());
    assert_eq!(step.status(), StepExecutionStatus::Running);

    registry.fire_event(&state(op("op1"), ExecutionState::Paused)).unwrap();
    assert_eq!(step.status(), StepExecutionStatus::Paused);

    registry.fire_event(&state(op("op1"), ExecutionState::Failed)).unwrap();
    assert!(!step.is_running());
    assert!(step.is_stopped());
    assert_eq!(step.errors(), 1);
    assert_eq!(step.status(), StepExecutionStatus::Stopped);

    let other = execution.step_interface("Write", 0).unwrap();
    registry.fire_event(&state(op("op2"), ExecutionState::Finished)).unwrap();
    assert_eq!(other.status_description(), "Finished");
    assert!(!other.is_stopped());
}

#[test]
fn test_pipeline_failure_counts_one_error() {
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    registry.fire_event(&state(op("op2"), ExecutionState::Running)).unwrap();

    registry
        .fire_event(&state(RemoteSource::transformation("p1"), ExecutionState::Failed))
        .unwrap();

    assert_eq!(execution.errors(), 1);
    assert_eq!(execution.result().nr_errors, 1);
    assert_eq!(execution.status(), "Finished (with errors)");
    for step in execution.steps() {
        assert!(!step.is_running());
        assert!(step.is_stopped());
        assert_eq!(step.errors(), 0);
        assert_eq!(step.status(), StepExecutionStatus::Stopped);
    }
}

#[test]
fn test_pipeline_end_settles_unreported_steps() {
    let pipeline = RemoteSource::transformation("p1");
    for (terminal, expected) in [
        (ExecutionState::Finished, "Finished"),
        (ExecutionState::Stopped, "Finished"),
        (ExecutionState::Failed, "Stopped"),
    ] {
        let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
        registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
        let write = execution.step_interface("Write", 0).unwrap();
        assert_eq!(write.status_description(), "Initializing");

        registry.fire_event(&state(pipeline.clone(), terminal)).unwrap();

        assert_eq!(write.status_description(), expected, "{terminal:?}");
        assert_eq!(
            execution.step_interface("Read", 0).unwrap().status_description(),
            expected,
            "{terminal:?}"
        );
    }

    // A step that finished on its own keeps its status
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op2"), ExecutionState::Finished)).unwrap();
    registry.fire_event(&state(pipeline, ExecutionState::Failed)).unwrap();
    let write = execution.step_interface("Write", 0).unwrap();
    assert_eq!(write.status_description(), "Finished");
    assert!(!write.is_stopped());
}

#[test]
fn test_execution_status_strings() {
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    let pipeline = RemoteSource::transformation("p1");

    registry.fire_event(&state(pipeline.clone(), ExecutionState::Running)).unwrap();
    assert!(execution.is_running());
    assert_eq!(execution.status(), "Running");

    registry.fire_event(&state(pipeline.clone(), ExecutionState::Paused)).unwrap();
    assert_eq!(execution.status(), "Paused");

    registry.fire_event(&error_log(pipeline.clone())).unwrap();
    registry.fire_event(&state(pipeline.clone(), ExecutionState::Stopped)).unwrap();
    assert_eq!(execution.errors(), 1);
    assert_eq!(execution.status(), "Stopped (with errors)");
    assert_eq!(execution.log_entries().len(), 1);

    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(pipeline, ExecutionState::Failed)).unwrap();
    assert!(execution.is_finished());
    assert_eq!(execution.status(), "Finished (with errors)");
}

#[tokio::test]
async fn test_wait_until_finished_resolves_on_terminal_status() {
    let (execution, registry, _channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();

    let daemon = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let pipeline = RemoteSource::transformation("p1");
            registry.fire_event(&state(pipeline.clone(), ExecutionState::Running)).unwrap();
            registry.fire_event(&state(pipeline, ExecutionState::Finished)).unwrap();
        })
    };

    let finished = execution
        .wait_until_finished(Some(Duration::from_secs(5)), &CancellationToken::new())
        .await
        .unwrap();
    daemon.await.unwrap();

    assert_eq!(finished, ExecutionState::Finished);
    assert_eq!(execution.status(), "Finished");
    // The step that was still running ends with the pipeline
    let step = execution.step_interface("Read", 0).unwrap();
    assert!(!step.is_running());
    assert_eq!(step.status_description(), "Finished");

    // A second wait returns immediately
    let again = execution
        .wait_until_finished(Some(Duration::from_millis(10)), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again, ExecutionState::Finished);
}

#[tokio::test]
async fn test_wait_until_finished_times_out() {
    let (execution, _registry, _channel) = prepared_execution(two_step_pipeline());
    let result = execution
        .wait_until_finished(Some(Duration::from_millis(50)), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ExecutionError::WaitTimeout(_))));
}

#[tokio::test]
async fn test_wait_until_finished_can_be_cancelled() {
    let (execution, _registry, _channel) = prepared_execution(two_step_pipeline());
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let result = execution.wait_until_finished(None, &cancel).await;
    canceller.await.unwrap();
    assert!(matches!(result, Err(ExecutionError::WaitCancelled)));
}

#[tokio::test]
async fn test_wait_until_finished_fails_when_connection_drops() {
    let (execution, _registry, channel) = prepared_execution(two_step_pipeline());
    channel.drop_connection();

    let result = execution
        .wait_until_finished(Some(Duration::from_secs(5)), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ExecutionError::ConnectionClosed)));
}

#[tokio::test]
async fn test_dispose_releases_handlers_and_channel() {
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();

    execution.dispose().await;

    assert!(registry.is_empty());
    assert!(channel.is_closed());
    for step in execution.steps() {
        assert!(step.data().is_disposed());
        assert_eq!(step.status_description(), "Finished");
    }
    assert_eq!(
        registry.fire_event(&error_log(op("op1"))).unwrap(),
        0
    );
}

#[test]
fn test_dropping_undisposed_execution_releases_handlers_and_channel() {
    let (execution, registry, channel) = prepared_execution(two_step_pipeline());
    registry.fire_event(&state(op("op1"), ExecutionState::Running)).unwrap();
    assert!(!registry.is_empty());

    drop(execution);

    assert!(registry.is_empty());
    assert!(channel.is_closed());
    // Nothing else keeps the steps, and through them the channel, alive
    assert_eq!(Arc::strong_count(&channel), 1);
}
