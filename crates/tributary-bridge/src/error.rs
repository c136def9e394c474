// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bridge error types.
//!
//! Registration and connection failures are returned to the caller that
//! triggered them. Dispatch failures and remote-reported errors are absorbed
//! into adapter state instead and only show up through polling getters.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tributary_protocol::{ClientError, FrameError};

/// Failure raised by an event handler while processing one message.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler could not make sense of the message
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The handler failed for a reason unrelated to the message content
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Errors raised by the [`EventRegistry`](crate::registry::EventRegistry).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Duplicate or malformed registration; the registry was not modified
    #[error("handler registration failed: {0}")]
    HandlerRegistration(String),

    /// Dispatch failed for a malformed message, or at least one handler
    /// returned an error. Every other handler was still invoked.
    #[error("failed to fire event for {key}: {reason}")]
    FireEvent {
        key: String,
        reason: String,
        /// Identifiers of the handlers that returned an error
        failed_handlers: Vec<String>,
        /// Error of the first failing handler
        #[source]
        cause: Option<HandlerError>,
    },
}

/// Errors raised while building handshake credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("incomplete credentials: {missing} is required when {present} is set")]
    PartialCredentials {
        missing: &'static str,
        present: &'static str,
    },

    #[error("failed to read keytab {path}: {source}")]
    KeytabRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed keytab: {0}")]
    MalformedKeytab(String),

    #[error("principal {principal} not found in keytab {path}")]
    PrincipalNotFound { principal: String, path: PathBuf },

    #[error("login failed: {0}")]
    Login(String),

    #[error("failed to build session token: {0}")]
    Token(String),
}

/// Errors raised by a daemon session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Daemon mode requires an explicit authentication decision
    #[error("daemon mode requires an authentication setting (use \"disabled\" to opt out)")]
    MissingAuthentication,

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon at {target} is unreachable: {source}")]
    Unreachable {
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] ClientError),

    #[error("no handshake reply within {0}ms")]
    HandshakeTimeout(u64),

    /// The daemon answered the handshake and refused the session
    #[error("daemon refused the session: {0}")]
    Refused(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("session receive path already started")]
    AlreadyStarted,

    #[error("session closed")]
    Closed,
}

/// Errors raised by the execution adapters.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid pipeline descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("execution already prepared")]
    AlreadyPrepared,

    #[error("execution not prepared")]
    NotPrepared,

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("execution did not finish within {0:?}")]
    WaitTimeout(Duration),

    #[error("wait for completion was cancelled")]
    WaitCancelled,

    #[error("connection closed before the execution finished")]
    ConnectionClosed,
}

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_event_error_exposes_cause() {
        let err = RegistryError::FireEvent {
            key: "log(operation:op1)".to_string(),
            reason: "1 of 2 handlers failed".to_string(),
            failed_handlers: vec!["a".to_string()],
            cause: Some(HandlerError::Failed("boom".to_string())),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "handler failed: boom");
        assert!(err.to_string().contains("log(operation:op1)"));
    }

    #[test]
    fn test_partial_credentials_message() {
        let err = AuthError::PartialCredentials {
            missing: "keytab",
            present: "principal",
        };
        assert_eq!(
            err.to_string(),
            "incomplete credentials: keytab is required when principal is set"
        );
    }

    #[test]
    fn test_refusal_is_distinct_from_auth_failure() {
        let refused = SessionError::Refused("bad token".to_string());
        let local = SessionError::from(AuthError::Login("no key".to_string()));
        assert!(matches!(refused, SessionError::Refused(_)));
        assert!(matches!(local, SessionError::Auth(_)));
    }
}
