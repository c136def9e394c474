// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session configuration.

use std::env;
use std::path::PathBuf;

use crate::auth::AuthSettings;
use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 53000;

/// Connection parameters for a daemon session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Daemon host name or address (default: "localhost")
    pub host: String,
    /// Daemon port (default: 53000)
    pub port: u16,
    /// Daemon (authenticated) mode rather than direct mode (default: true)
    pub use_daemon: bool,
    /// Authentication decision; required in daemon mode, ignored in direct mode
    pub auth: Option<AuthSettings>,
    /// Server name for TLS verification (default: the host)
    pub server_name: Option<String>,
    /// Skip TLS certificate verification (default: false, use true for dev)
    pub skip_cert_verification: bool,
    /// Connection timeout in milliseconds (default: 10_000)
    pub connect_timeout_ms: u64,
    /// Time allowed for the daemon to answer the handshake (default: 10_000)
    pub handshake_timeout_ms: u64,
    /// Idle timeout in milliseconds (default: 600_000)
    pub idle_timeout_ms: u64,
    /// Keep-alive interval in milliseconds, 0 to disable (default: 10_000)
    pub keep_alive_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool(
    var: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::trim) {
        None => Ok(default),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            var,
            value: other.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            use_daemon: true,
            auth: None,
            server_name: None,
            skip_cert_verification: false,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            idle_timeout_ms: 600_000,
            keep_alive_interval_ms: 10_000,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `TRIBUTARY_DAEMON_HOST` - Daemon host (default: "localhost")
    /// - `TRIBUTARY_DAEMON_PORT` - Daemon port (default: 53000)
    /// - `TRIBUTARY_USE_DAEMON` - Daemon mode (default: true)
    /// - `TRIBUTARY_AUTH` - `disabled` or `kerberos`; when unset, kerberos is
    ///   implied by `TRIBUTARY_KEYTAB` or `TRIBUTARY_PRINCIPAL`
    /// - `TRIBUTARY_KEYTAB` - Keytab path
    /// - `TRIBUTARY_PRINCIPAL` - Principal to log in as
    /// - `TRIBUTARY_SERVER_NAME` - Server name for TLS (default: the host)
    /// - `TRIBUTARY_SKIP_CERT_VERIFICATION` - Skip TLS verification (default: false)
    /// - `TRIBUTARY_CONNECT_TIMEOUT_MS` - Connection timeout (default: 10000)
    /// - `TRIBUTARY_HANDSHAKE_TIMEOUT_MS` - Handshake timeout (default: 10000)
    /// - `TRIBUTARY_IDLE_TIMEOUT_MS` - Idle timeout (default: 600000)
    /// - `TRIBUTARY_KEEP_ALIVE_MS` - Keep-alive interval, 0 to disable (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Same as [`SessionConfig::from_env`], reading variables through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let keytab = lookup("TRIBUTARY_KEYTAB").map(PathBuf::from);
        let principal = lookup("TRIBUTARY_PRINCIPAL");

        let auth = match lookup("TRIBUTARY_AUTH").as_deref().map(str::trim) {
            Some("disabled" | "none") => Some(AuthSettings::Disabled),
            Some("kerberos") => Some(AuthSettings::Kerberos { keytab, principal }),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "TRIBUTARY_AUTH",
                    value: other.to_string(),
                    reason: "expected disabled or kerberos".to_string(),
                });
            }
            None if keytab.is_some() || principal.is_some() => {
                Some(AuthSettings::Kerberos { keytab, principal })
            }
            None => None,
        };

        Ok(Self {
            host: lookup("TRIBUTARY_DAEMON_HOST").unwrap_or(default.host),
            port: parse_var(
                "TRIBUTARY_DAEMON_PORT",
                lookup("TRIBUTARY_DAEMON_PORT"),
                default.port,
            )?,
            use_daemon: parse_bool(
                "TRIBUTARY_USE_DAEMON",
                lookup("TRIBUTARY_USE_DAEMON"),
                default.use_daemon,
            )?,
            auth,
            server_name: lookup("TRIBUTARY_SERVER_NAME"),
            skip_cert_verification: parse_bool(
                "TRIBUTARY_SKIP_CERT_VERIFICATION",
                lookup("TRIBUTARY_SKIP_CERT_VERIFICATION"),
                default.skip_cert_verification,
            )?,
            connect_timeout_ms: parse_var(
                "TRIBUTARY_CONNECT_TIMEOUT_MS",
                lookup("TRIBUTARY_CONNECT_TIMEOUT_MS"),
                default.connect_timeout_ms,
            )?,
            handshake_timeout_ms: parse_var(
                "TRIBUTARY_HANDSHAKE_TIMEOUT_MS",
                lookup("TRIBUTARY_HANDSHAKE_TIMEOUT_MS"),
                default.handshake_timeout_ms,
            )?,
            idle_timeout_ms: parse_var(
                "TRIBUTARY_IDLE_TIMEOUT_MS",
                lookup("TRIBUTARY_IDLE_TIMEOUT_MS"),
                default.idle_timeout_ms,
            )?,
            keep_alive_interval_ms: parse_var(
                "TRIBUTARY_KEEP_ALIVE_MS",
                lookup("TRIBUTARY_KEEP_ALIVE_MS"),
                default.keep_alive_interval_ms,
            )?,
        })
    }

    /// Configuration for a local development daemon.
    ///
    /// Connects to `localhost:53000` in daemon mode with authentication
    /// explicitly disabled and TLS verification skipped.
    pub fn localhost() -> Self {
        Self::default()
            .with_auth(AuthSettings::Disabled)
            .with_skip_cert_verification(true)
    }

    pub fn with_use_daemon(mut self, use_daemon: bool) -> Self {
        self.use_daemon = use_daemon;
        self
    }

    pub fn with_auth(mut self, auth: AuthSettings) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set the server name for TLS verification.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Skip TLS certificate verification (for development only!).
    pub fn with_skip_cert_verification(mut self, skip: bool) -> Self {
        self.skip_cert_verification = skip;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_handshake_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.handshake_timeout_ms = timeout_ms;
        self
    }

    /// URI the handshake token is bound to.
    pub fn target_uri(&self) -> String {
        format!("quic://{}:{}", self.host, self.port)
    }

    /// Name presented for TLS verification.
    pub fn effective_server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }
}
