// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for the bridge integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tributary_bridge::{
    DaemonChannel, EventRegistry, Keytab, PipelineDescriptor, RemoteExecution, SessionError,
    StepDescriptor, StopMessage,
};
use tributary_bridge::auth::KeytabEntry;

pub const PRINCIPAL: &str = "etl/worker@EXAMPLE.COM";
pub const SESSION_KEY: [u8; 32] = [7; 32];

/// In-memory channel recording every stop request.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<StopMessage>>,
    failing: AtomicBool,
    closed: CancellationToken,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<StopMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every following send fail.
    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Simulate the daemon dropping the connection.
    pub fn drop_connection(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl DaemonChannel for RecordingChannel {
    async fn send_message(&self, message: &StopMessage) -> Result<(), SessionError> {
        if self.closed.is_cancelled() || self.failing.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Two single-copy steps: "Read" on op1 and "Write" on op2.
pub fn two_step_pipeline() -> PipelineDescriptor {
    PipelineDescriptor::new("p1", "orders")
        .with_step(StepDescriptor::new("Read", "op1"))
        .with_step(StepDescriptor::new("Write", "op2"))
}

/// A prepared execution over a recording channel.
pub fn prepared_execution(
    descriptor: PipelineDescriptor,
) -> (RemoteExecution, Arc<EventRegistry>, Arc<RecordingChannel>) {
    let registry = Arc::new(EventRegistry::new());
    let channel = RecordingChannel::new();
    let execution =
        RemoteExecution::new(descriptor, Arc::clone(&registry), channel.clone()).unwrap();
    execution.prepare_execution().unwrap();
    (execution, registry, channel)
}

/// Write a keytab holding [`PRINCIPAL`] (kvno 1 and 2, the latter keyed with
/// [`SESSION_KEY`]) and an unrelated principal.
pub fn write_keytab() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.keytab");
    let keytab = Keytab::new(vec![
        KeytabEntry::new(PRINCIPAL, 1, 18, vec![1; 32]),
        KeytabEntry::new(PRINCIPAL, 2, 18, SESSION_KEY.to_vec()),
        KeytabEntry::new("other@EXAMPLE.COM", 4, 17, vec![4; 16]),
    ]);
    std::fs::write(&path, keytab.to_bytes()).unwrap();
    (dir, path)
}
