// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-step data adapter: execution status of one remote step copy.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use serde::Serialize;

/// Execution status of a step, as the local step runtime reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StepExecutionStatus {
    Empty = 0,
    Init = 1,
    Running = 2,
    Idle = 3,
    Finished = 4,
    Stopped = 5,
    Disposed = 6,
    Halted = 7,
    Paused = 8,
    Halting = 9,
}

impl StepExecutionStatus {
    pub fn description(&self) -> &'static str {
        match self {
            StepExecutionStatus::Empty => "Empty",
            StepExecutionStatus::Init => "Initializing",
            StepExecutionStatus::Running => "Running",
            StepExecutionStatus::Idle => "Idle",
            StepExecutionStatus::Finished => "Finished",
            StepExecutionStatus::Stopped => "Stopped",
            StepExecutionStatus::Disposed => "Disposed",
            StepExecutionStatus::Halted => "Halted",
            StepExecutionStatus::Paused => "Paused",
            StepExecutionStatus::Halting => "Halting",
        }
    }

    /// No further work will happen in this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepExecutionStatus::Finished
                | StepExecutionStatus::Stopped
                | StepExecutionStatus::Disposed
                | StepExecutionStatus::Halted
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => StepExecutionStatus::Init,
            2 => StepExecutionStatus::Running,
            3 => StepExecutionStatus::Idle,
            4 => StepExecutionStatus::Finished,
            5 => StepExecutionStatus::Stopped,
            6 => StepExecutionStatus::Disposed,
            7 => StepExecutionStatus::Halted,
            8 => StepExecutionStatus::Paused,
            9 => StepExecutionStatus::Halting,
            _ => StepExecutionStatus::Empty,
        }
    }
}

impl fmt::Display for StepExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

const IN_FLIGHT_UNKNOWN: i64 = -1;

#[derive(Debug)]
pub struct RemoteStepData {
    status: AtomicU8,
    in_flight: AtomicI64,
}

impl Default for RemoteStepData {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStepData {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(StepExecutionStatus::Init as u8),
            in_flight: AtomicI64::new(IN_FLIGHT_UNKNOWN),
        }
    }

    pub fn status(&self) -> StepExecutionStatus {
        StepExecutionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: StepExecutionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Set `status` unless the current status is `keep`.
    pub(crate) fn set_status_unless(&self, status: StepExecutionStatus, keep: StepExecutionStatus) {
        let _ = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != keep as u8).then_some(status as u8)
            });
    }

    pub fn is_initialising(&self) -> bool {
        self.status() == StepExecutionStatus::Init
    }

    pub fn is_running(&self) -> bool {
        self.status() == StepExecutionStatus::Running
    }

    pub fn is_idle(&self) -> bool {
        self.status() == StepExecutionStatus::Idle
    }

    pub fn is_disposed(&self) -> bool {
        self.status() == StepExecutionStatus::Disposed
    }

    pub fn is_finished(&self) -> bool {
        self.status() == StepExecutionStatus::Finished
    }

    /// Whether the step's row buffer is empty, as of the last metrics report.
    /// False until a report has arrived.
    pub fn is_empty(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    pub fn set_in_flight(&self, rows: u64) {
        let rows = i64::try_from(rows).unwrap_or(i64::MAX);
        self.in_flight.store(rows, Ordering::Release);
    }
}
