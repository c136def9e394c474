// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Whole-execution adapter: a pipeline run executing inside the daemon.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::lock;
use super::step::RemoteStep;
use crate::config::SessionConfig;
use crate::descriptor::PipelineDescriptor;
use crate::error::{ExecutionError, HandlerError};
use crate::registry::{EventRegistry, FnHandler};
use crate::session::{DaemonChannel, DaemonSession};
use crate::types::{
    EventKey, ExecutionState, LogEntry, Message, RemoteSource, StatusReport, StopMessage,
};

/// Number of execution-level log entries kept for [`RemoteExecution::log_entries`].
pub const LOG_BUFFER_SIZE: usize = 1_000;

/// Summary of a run, in the shape of the local runtime's result object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub nr_errors: u64,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_rejected: u64,
    pub stopped: bool,
    pub finished: bool,
}

/// State shared with the execution-level handlers.
struct ExecutionShared {
    errors: AtomicU64,
    preparing: AtomicBool,
    initializing: AtomicBool,
    running: AtomicBool,
    paused: AtomicBool,
    finished: AtomicBool,
    stopped: AtomicBool,
    steps: OnceLock<Vec<Arc<RemoteStep>>>,
    log: Mutex<VecDeque<LogEntry>>,
    remote_state: watch::Sender<Option<ExecutionState>>,
}

impl ExecutionShared {
    fn new() -> Self {
        Self {
            errors: AtomicU64::new(0),
            preparing: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            steps: OnceLock::new(),
            log: Mutex::new(VecDeque::with_capacity(LOG_BUFFER_SIZE)),
            remote_state: watch::Sender::new(None),
        }
    }

    fn steps(&self) -> &[Arc<RemoteStep>] {
        self.steps.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn on_state(&self, state: ExecutionState) {
        info!(?state, "remote execution state");
        match state {
            ExecutionState::Running => {
                self.initializing.store(false, Ordering::Release);
                self.running.store(true, Ordering::Release);
                self.paused.store(false, Ordering::Release);
            }
            ExecutionState::Paused => {
                self.running.store(true, Ordering::Release);
                self.paused.store(true, Ordering::Release);
            }
            ExecutionState::Finished | ExecutionState::Stopped | ExecutionState::Failed => {
                self.initializing.store(false, Ordering::Release);
                self.running.store(false, Ordering::Release);
                self.paused.store(false, Ordering::Release);
                match state {
                    ExecutionState::Stopped => self.stopped.store(true, Ordering::Release),
                    ExecutionState::Failed => {
                        self.errors.fetch_max(1, Ordering::AcqRel);
                        self.finished.store(true, Ordering::Release);
                    }
                    _ => self.finished.store(true, Ordering::Release),
                }
                // Steps the daemon never reported on end with the pipeline
                for step in self.steps() {
                    step.end_with_pipeline(state);
                }
            }
        }
        self.remote_state.send_replace(Some(state));
    }

    fn on_log(&self, entry: &LogEntry) {
        if entry.level.is_error() {
            self.errors.fetch_add(1, Ordering::AcqRel);
            warn!(message = %entry.message, "remote execution error");
        }
        let mut log = lock(&self.log);
        if log.len() == LOG_BUFFER_SIZE {
            log.pop_front();
        }
        log.push_back(entry.clone());
    }

    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        match message {
            Message::Status {
                report: StatusReport::State(state),
                ..
            } => self.on_state(*state),
            Message::Status {
                report: StatusReport::SubStatus(status),
                ..
            } => {
                debug!(step = %status.step_name, copy = status.copy, "ignoring pipeline-level sub-status");
            }
            Message::Log { entry, .. } => self.on_log(entry),
            other => {
                return Err(HandlerError::Rejected(format!(
                    "unexpected execution-level message {:?}",
                    other.key()
                )));
            }
        }
        Ok(())
    }
}

/// Drop-in replacement for a locally executed pipeline run.
pub struct RemoteExecution {
    descriptor: PipelineDescriptor,
    source: RemoteSource,
    registry: Arc<EventRegistry>,
    channel: Arc<dyn DaemonChannel>,
    state: Arc<ExecutionShared>,
    prepared: AtomicBool,
}

impl RemoteExecution {
    pub fn new(
        descriptor: PipelineDescriptor,
        registry: Arc<EventRegistry>,
        channel: Arc<dyn DaemonChannel>,
    ) -> Result<Self, ExecutionError> {
        descriptor.validate()?;
        Ok(Self {
            source: descriptor.source(),
            descriptor,
            registry,
            channel,
            state: Arc::new(ExecutionShared::new()),
            prepared: AtomicBool::new(false),
        })
    }

    /// Connect to the daemon and prepare the execution.
    ///
    /// Descriptor, authentication and connection failures are all reported
    /// before any adapter state exists. The receive path is only started once
    /// every handler is registered.
    #[instrument(skip(descriptor, config), fields(pipeline = %descriptor.id))]
    pub async fn connect(
        descriptor: PipelineDescriptor,
        config: &SessionConfig,
    ) -> Result<Self, ExecutionError> {
        descriptor.validate()?;
        let session = Arc::new(DaemonSession::connect(config).await?);
        let registry = Arc::new(EventRegistry::new());

        let execution = Self::new(descriptor, Arc::clone(&registry), session.clone())?;
        execution.prepare_execution()?;
        session.start(registry).await?;
        Ok(execution)
    }

    fn execution_keys(&self) -> [(EventKey, String); 2] {
        [
            (
                EventKey::Status(self.source.clone()),
                format!("{}:status", self.descriptor.id),
            ),
            (
                EventKey::Log(self.source.clone()),
                format!("{}:log", self.descriptor.id),
            ),
        ]
    }

    /// Create the step adapters and register every handler.
    #[instrument(skip(self), fields(pipeline = %self.descriptor.id))]
    pub fn prepare_execution(&self) -> Result<(), ExecutionError> {
        if self
            .prepared
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ExecutionError::AlreadyPrepared);
        }
        self.state.preparing.store(true, Ordering::Release);

        let result = self.register_all();
        self.state.preparing.store(false, Ordering::Release);

        match result {
            Ok(steps) => {
                info!(steps = steps.len(), "execution prepared");
                let _ = self.state.steps.set(steps);
                self.state.initializing.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.prepared.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn register_all(&self) -> Result<Vec<Arc<RemoteStep>>, ExecutionError> {
        let mut steps: Vec<Arc<RemoteStep>> = Vec::with_capacity(self.descriptor.copy_count());
        let mut registered_keys: Vec<(EventKey, String)> = Vec::new();

        let rollback = |steps: &[Arc<RemoteStep>], keys: &[(EventKey, String)]| {
            for step in steps {
                step.unregister(&self.registry);
            }
            for (key, id) in keys {
                self.registry.remove_handler(key, id);
            }
        };

        for descriptor in &self.descriptor.steps {
            for copy in 0..descriptor.copies {
                let step = Arc::new(RemoteStep::new(
                    descriptor.name.clone(),
                    copy,
                    descriptor.source_for_copy(copy),
                    Arc::clone(&self.channel),
                ));
                if let Err(e) = step.register(&self.registry) {
                    rollback(&steps, &registered_keys);
                    return Err(e.into());
                }
                steps.push(step);
            }
        }

        for (key, id) in self.execution_keys() {
            let state = Arc::clone(&self.state);
            let handler = FnHandler::shared(id.clone(), move |message| state.handle(message));
            if let Err(e) = self.registry.add_handler(key.clone(), handler) {
                rollback(&steps, &registered_keys);
                return Err(e.into());
            }
            registered_keys.push((key, id));
        }

        Ok(steps)
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    /// Remote identity of the pipeline run.
    pub fn source(&self) -> &RemoteSource {
        &self.source
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Step adapters, in descriptor order. Empty until prepared.
    pub fn steps(&self) -> &[Arc<RemoteStep>] {
        self.state.steps()
    }

    pub fn step_interface(&self, name: &str, copy: u32) -> Option<Arc<RemoteStep>> {
        self.steps()
            .iter()
            .find(|step| step.step_name() == name && step.copy() == copy)
            .cloned()
    }

    /// Every copy of the named step.
    pub fn find_step_interfaces(&self, name: &str) -> Vec<Arc<RemoteStep>> {
        self.steps()
            .iter()
            .filter(|step| step.step_name() == name)
            .cloned()
            .collect()
    }

    /// Execution-level errors plus the errors of every step.
    pub fn errors(&self) -> u64 {
        self.state.errors.load(Ordering::Acquire)
            + self.steps().iter().map(|step| step.errors()).sum::<u64>()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    pub fn is_preparing(&self) -> bool {
        self.state.preparing.load(Ordering::Acquire)
    }

    pub fn is_initializing(&self) -> bool {
        self.state.initializing.load(Ordering::Acquire)
    }

    /// Status line in the local runtime's wording.
    pub fn status(&self) -> String {
        let errors = self.errors();
        let status = if self.is_running() {
            if self.is_stopped() {
                "Halting"
            } else if self.is_paused() {
                "Paused"
            } else {
                "Running"
            }
        } else if self.is_finished() {
            if errors > 0 {
                "Finished (with errors)"
            } else {
                "Finished"
            }
        } else if self.is_stopped() {
            if errors > 0 {
                "Stopped (with errors)"
            } else {
                "Stopped"
            }
        } else if self.is_preparing() {
            "Preparing executing"
        } else if self.is_initializing() {
            "Initializing"
        } else {
            "Waiting"
        };
        status.to_string()
    }

    /// Ask every running step to wind down.
    ///
    /// Each step reads as halting before its stop request is even sent.
    /// Steps already safe-stopped are skipped. Every step is attempted even
    /// if a send fails; the first failure is returned.
    #[instrument(skip(self), fields(pipeline = %self.descriptor.id))]
    pub async fn safe_stop(&self, reason: &str) -> Result<usize, ExecutionError> {
        let targets: Vec<_> = self
            .steps()
            .iter()
            .filter(|step| step.is_running() && !step.is_safe_stopped())
            .cloned()
            .collect();

        // Local transition first, for every target
        for step in &targets {
            step.mark_stopping(true);
        }
        if !targets.is_empty() {
            self.state.stopped.store(true, Ordering::Release);
        }

        let message = StopMessage::safe(reason);
        let mut first_error = None;
        for step in &targets {
            if let Err(e) = step.send_stop(&message).await {
                first_error.get_or_insert(e);
            }
        }

        info!(steps = targets.len(), "safe stop requested");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(targets.len()),
        }
    }

    /// Stop the whole run immediately with a single stop request.
    #[instrument(skip(self), fields(pipeline = %self.descriptor.id))]
    pub async fn stop_all(&self, reason: &str) -> Result<(), ExecutionError> {
        for step in self.steps() {
            step.mark_stopping(false);
        }
        self.state.stopped.store(true, Ordering::Release);
        self.channel
            .send_message(&StopMessage::immediate(reason))
            .await?;
        info!("stop requested");
        Ok(())
    }

    /// Wait for the daemon to report a terminal state for the pipeline.
    ///
    /// Fails with [`ExecutionError::WaitTimeout`] once `timeout` elapses,
    /// [`ExecutionError::WaitCancelled`] when `cancel` fires and
    /// [`ExecutionError::ConnectionClosed`] when the channel goes away first.
    pub async fn wait_until_finished(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionState, ExecutionError> {
        let mut remote_state = self.state.remote_state.subscribe();
        let closed = self.channel.closed();

        let wait = async {
            loop {
                if let Some(state) = *remote_state.borrow_and_update()
                    && state.is_terminal()
                {
                    return Ok(state);
                }
                tokio::select! {
                    _ = remote_state.changed() => {}
                    _ = cancel.cancelled() => return Err(ExecutionError::WaitCancelled),
                    _ = closed.cancelled() => {
                        // A terminal report may have raced the close
                        return match *remote_state.borrow() {
                            Some(state) if state.is_terminal() => Ok(state),
                            _ => Err(ExecutionError::ConnectionClosed),
                        };
                    }
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ExecutionError::WaitTimeout(limit))?,
            None => wait.await,
        }
    }

    pub fn result(&self) -> ExecutionResult {
        let steps = self.steps();
        ExecutionResult {
            nr_errors: self.errors(),
            lines_read: steps.iter().map(|step| step.lines_read()).sum(),
            lines_written: steps.iter().map(|step| step.lines_written()).sum(),
            lines_rejected: steps.iter().map(|step| step.lines_rejected()).sum(),
            stopped: self.is_stopped(),
            finished: self.is_finished(),
        }
    }

    /// Most recent execution-level log entries, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        lock(&self.state.log).iter().cloned().collect()
    }

    fn release_handlers(&self) {
        for step in self.steps() {
            step.unregister(&self.registry);
        }
        // The pipeline's own identities belong to this execution alone
        for (key, _) in self.execution_keys() {
            self.registry.remove_handlers(&key);
        }
    }

    /// Release the execution: drop every handler and close the channel.
    #[instrument(skip(self), fields(pipeline = %self.descriptor.id))]
    pub async fn dispose(&self) {
        self.release_handlers();
        for step in self.steps() {
            step.dispose();
        }
        self.state.running.store(false, Ordering::Release);
        self.channel.close().await;
        info!("execution disposed");
    }
}

impl Drop for RemoteExecution {
    /// Unhooks the handlers and ends the receive path of an execution that
    /// was never disposed.
    fn drop(&mut self) {
        if !self.prepared.load(Ordering::Acquire) {
            return;
        }
        self.release_handlers();
        let closed = self.channel.closed();
        if !closed.is_cancelled() {
            debug!(pipeline = %self.descriptor.id, "execution dropped without dispose");
            closed.cancel();
        }
    }
}

impl std::fmt::Debug for RemoteExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExecution")
            .field("pipeline", &self.descriptor.id)
            .field("status", &self.status())
            .field("errors", &self.errors())
            .finish()
    }
}
