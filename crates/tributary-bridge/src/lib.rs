// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tributary Bridge
//!
//! Runs pipelines inside a remote execution daemon while the local runtime
//! keeps treating them as ordinary in-process steps.
//!
//! # Architecture
//!
//! - [`EventRegistry`] routes every inbound daemon message to the handlers
//!   registered for its kind and [`RemoteSource`]
//! - [`SessionAuthenticator`] logs in from a keytab and produces the
//!   handshake credentials
//! - [`DaemonSession`] owns the QUIC connection, the handshake and the single
//!   receive path feeding the registry
//! - [`RemoteExecution`] and [`RemoteStep`] are the adapters the local
//!   runtime polls
//!
//! # Example
//!
//! ```no_run
//! use tributary_bridge::{PipelineDescriptor, RemoteExecution, SessionConfig, StepDescriptor};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = PipelineDescriptor::new("p1", "orders")
//!     .with_step(StepDescriptor::new("Read orders", "op1"))
//!     .with_step(StepDescriptor::new("Write orders", "op2"));
//!
//! let execution = RemoteExecution::connect(descriptor, &SessionConfig::from_env()?).await?;
//! let state = execution
//!     .wait_until_finished(None, &CancellationToken::new())
//!     .await?;
//! println!("{:?}: {}", state, execution.status());
//! execution.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod auth;
pub mod config;
pub mod convert;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod session;
pub mod types;

pub use adapter::{
    ExecutionResult, RemoteExecution, RemoteStep, RemoteStepData, StepExecutionStatus,
};
pub use auth::{AuthSettings, Keytab, KeytabLogin, LoginProvider, SessionAuthenticator};
pub use config::SessionConfig;
pub use descriptor::{PipelineDescriptor, StepDescriptor};
pub use error::{
    AuthError, ConfigError, ExecutionError, HandlerError, RegistryError, SessionError,
};
pub use registry::{EventHandler, EventRegistry, FnHandler};
pub use session::{DaemonChannel, DaemonSession};
pub use types::{
    EventKey, ExecutionState, LogEntry, LogLevel, Message, Metrics, ModelType, RemoteSource,
    StatusReport, StepStatus, StopMessage,
};
