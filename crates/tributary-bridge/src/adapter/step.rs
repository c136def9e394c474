// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-step adapter: one remote step copy behind the local step contract.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use super::lock;
use super::step_data::{RemoteStepData, StepExecutionStatus};
use crate::error::{HandlerError, RegistryError, SessionError};
use crate::registry::{EventHandler, EventRegistry, FnHandler};
use crate::session::DaemonChannel;
use crate::types::{
    EventKey, ExecutionState, LogEntry, Message, Metrics, RemoteSource, StatusReport, StepStatus,
    StopMessage,
};

pub struct RemoteStep {
    name: String,
    copy: u32,
    source: RemoteSource,
    channel: Arc<dyn DaemonChannel>,
    data: RemoteStepData,

    errors: AtomicU64,
    running: AtomicBool,
    stopped: AtomicBool,
    safe_stopped: AtomicBool,
    paused: AtomicBool,

    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_rejected: AtomicU64,

    sub_statuses: Mutex<Vec<StepStatus>>,
}

impl RemoteStep {
    pub fn new(
        name: impl Into<String>,
        copy: u32,
        source: RemoteSource,
        channel: Arc<dyn DaemonChannel>,
    ) -> Self {
        Self {
            name: name.into(),
            copy,
            source,
            channel,
            data: RemoteStepData::new(),
            errors: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            safe_stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            lines_read: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
            sub_statuses: Mutex::new(Vec::new()),
        }
    }

    pub fn step_name(&self) -> &str {
        &self.name
    }

    pub fn copy(&self) -> u32 {
        self.copy
    }

    pub fn source(&self) -> &RemoteSource {
        &self.source
    }

    pub fn data(&self) -> &RemoteStepData {
        &self.data
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_safe_stopped(&self) -> bool {
        self.safe_stopped.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Acquire)
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Acquire)
    }

    pub fn lines_rejected(&self) -> u64 {
        self.lines_rejected.load(Ordering::Acquire)
    }

    // The remote engine does not distinguish input/output/update counters.
    pub fn lines_input(&self) -> u64 {
        self.lines_read()
    }

    pub fn lines_output(&self) -> u64 {
        self.lines_written()
    }

    pub fn lines_updated(&self) -> u64 {
        0
    }

    /// Statuses of the nested execution this step runs, in first-seen order.
    pub fn sub_statuses(&self) -> Vec<StepStatus> {
        lock(&self.sub_statuses).clone()
    }

    /// Status as the local step runtime would report it.
    pub fn status(&self) -> StepExecutionStatus {
        if self.is_running() {
            if self.is_stopped() {
                StepExecutionStatus::Halting
            } else if self.is_paused() {
                StepExecutionStatus::Paused
            } else {
                StepExecutionStatus::Running
            }
        } else {
            match self.data.status() {
                StepExecutionStatus::Disposed => StepExecutionStatus::Finished,
                status if self.is_stopped() && !status.is_terminal() => {
                    StepExecutionStatus::Stopped
                }
                status => status,
            }
        }
    }

    pub fn status_description(&self) -> &'static str {
        self.status().description()
    }

    fn handler_id(&self, kind: &str) -> String {
        format!("{}.{}:{}", self.name, self.copy, kind)
    }

    fn keys(&self) -> [(EventKey, &'static str); 3] {
        [
            (EventKey::Status(self.source.clone()), "status"),
            (EventKey::Log(self.source.clone()), "log"),
            (EventKey::Metrics(self.source.clone()), "metrics"),
        ]
    }

    /// Install the status, log and metrics handlers for this step.
    pub fn register(self: &Arc<Self>, registry: &EventRegistry) -> Result<(), RegistryError> {
        let mut added: Vec<(EventKey, String)> = Vec::new();
        for (key, kind) in self.keys() {
            let step = Arc::clone(self);
            let id = self.handler_id(kind);
            let handler: Arc<dyn EventHandler> =
                FnHandler::shared(id.clone(), move |message| step.handle(message));
            if let Err(e) = registry.add_handler(key.clone(), handler) {
                // Roll back only what this call added
                for (key, id) in &added {
                    registry.remove_handler(key, id);
                }
                return Err(e);
            }
            added.push((key, id));
        }
        debug!(step = %self.name, copy = self.copy, source = %self.source, "step handlers registered");
        Ok(())
    }

    pub fn unregister(&self, registry: &EventRegistry) {
        for (key, kind) in self.keys() {
            registry.remove_handler(&key, &self.handler_id(kind));
        }
    }

    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        match message {
            Message::Status { report, .. } => {
                self.on_status(report);
                Ok(())
            }
            Message::Log { entry, .. } => {
                self.on_log(entry);
                Ok(())
            }
            Message::Metrics { metrics, .. } => {
                self.on_metrics(metrics);
                Ok(())
            }
            Message::Stop(_) => Err(HandlerError::Rejected(format!(
                "step {} does not handle stop messages",
                self.name
            ))),
        }
    }

    fn on_status(&self, report: &StatusReport) {
        match report {
            StatusReport::State(state) => self.apply_state(*state),
            StatusReport::SubStatus(status) => {
                let mut statuses = lock(&self.sub_statuses);
                match statuses.iter_mut().find(|existing| existing.same_step(status)) {
                    Some(existing) => *existing = status.clone(),
                    None => statuses.push(status.clone()),
                }
            }
        }
    }

    pub(crate) fn apply_state(&self, state: ExecutionState) {
        debug!(step = %self.name, copy = self.copy, ?state, "remote state");
        match state {
            ExecutionState::Running => {
                self.running.store(true, Ordering::Release);
                self.paused.store(false, Ordering::Release);
                self.data
                    .set_status_unless(StepExecutionStatus::Running, StepExecutionStatus::Halting);
            }
            ExecutionState::Paused => {
                self.running.store(true, Ordering::Release);
                self.paused.store(true, Ordering::Release);
                self.data.set_status(StepExecutionStatus::Paused);
            }
            ExecutionState::Finished => {
                self.running.store(false, Ordering::Release);
                self.paused.store(false, Ordering::Release);
                self.data.set_status(StepExecutionStatus::Finished);
            }
            ExecutionState::Stopped => self.halt(StepExecutionStatus::Finished),
            ExecutionState::Failed => {
                self.errors.fetch_max(1, Ordering::AcqRel);
                self.halt(StepExecutionStatus::Stopped);
            }
        }
    }

    fn halt(&self, status: StepExecutionStatus) {
        self.running.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.stopped.store(true, Ordering::Release);
        self.data.set_status(status);
    }

    /// Follow a terminal pipeline state.
    ///
    /// Steps that already reached a terminal status of their own are left
    /// alone. A failed pipeline stops the step without counting an error
    /// against it; the failure is counted once, on the execution.
    pub(crate) fn end_with_pipeline(&self, state: ExecutionState) {
        if !self.is_running() && self.data.status().is_terminal() {
            return;
        }
        match state {
            ExecutionState::Failed => self.halt(StepExecutionStatus::Stopped),
            ExecutionState::Finished | ExecutionState::Stopped => self.apply_state(state),
            ExecutionState::Running | ExecutionState::Paused => {}
        }
    }

    fn on_log(&self, entry: &LogEntry) {
        if entry.level.is_error() {
            let errors = self.errors.fetch_add(1, Ordering::AcqRel) + 1;
            self.stopped.store(true, Ordering::Release);
            warn!(step = %self.name, copy = self.copy, errors, message = %entry.message, "remote step error");
        } else {
            debug!(step = %self.name, copy = self.copy, level = ?entry.level, message = %entry.message, "remote log");
        }
    }

    fn on_metrics(&self, metrics: &Metrics) {
        self.lines_read.store(metrics.entries_in, Ordering::Release);
        self.lines_written.store(metrics.entries_out, Ordering::Release);
        self.lines_rejected.store(metrics.dropped, Ordering::Release);
        self.data.set_in_flight(metrics.in_flight);
    }

    /// Mark the step stopping without contacting the daemon.
    pub(crate) fn mark_stopping(&self, safe: bool) {
        self.stopped.store(true, Ordering::Release);
        if safe {
            self.safe_stopped.store(true, Ordering::Release);
        }
        self.data.set_status(StepExecutionStatus::Halting);
    }

    /// Ask the daemon to wind this step down.
    ///
    /// The step reads as halting as soon as this is called; completion is
    /// only known once the daemon reports a terminal state.
    #[instrument(skip(self), fields(step = %self.name, copy = self.copy))]
    pub async fn safe_stop(&self, reason: &str) -> Result<(), SessionError> {
        self.mark_stopping(true);
        self.send_stop(&StopMessage::safe(reason)).await
    }

    #[instrument(skip(self), fields(step = %self.name, copy = self.copy))]
    pub async fn stop(&self, reason: &str) -> Result<(), SessionError> {
        self.mark_stopping(false);
        self.send_stop(&StopMessage::immediate(reason)).await
    }

    /// Deliver a stop request for a step already marked stopping.
    pub(crate) async fn send_stop(&self, message: &StopMessage) -> Result<(), SessionError> {
        if let Err(e) = self.channel.send_message(message).await {
            warn!(step = %self.name, copy = self.copy, error = %e, "stop request not delivered");
            return Err(e);
        }
        info!(step = %self.name, copy = self.copy, safe = message.safe_stop, "stop requested");
        Ok(())
    }

    pub fn dispose(&self) {
        self.running.store(false, Ordering::Release);
        self.data.set_status(StepExecutionStatus::Disposed);
    }
}

impl std::fmt::Debug for RemoteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStep")
            .field("name", &self.name)
            .field("copy", &self.copy)
            .field("source", &self.source)
            .field("status", &self.status())
            .field("errors", &self.errors())
            .finish()
    }
}
