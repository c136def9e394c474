// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine adapters: remote executions behind the local step/job contract.
//!
//! - [`RemoteExecution`] stands in for a whole pipeline run
//! - [`RemoteStep`] stands in for one step copy
//! - [`RemoteStepData`] tracks the execution status of a step copy
//!
//! All three are written by registry handlers on the session receive path and
//! read synchronously by callers. State lives in atomics or short critical
//! sections.

pub mod execution;
pub mod step;
pub mod step_data;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use execution::{ExecutionResult, RemoteExecution};
pub use step::RemoteStep;
pub use step_data::{RemoteStepData, StepExecutionStatus};

/// Lock adapter state. Poisoning is ignored, the guarded values are plain data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
