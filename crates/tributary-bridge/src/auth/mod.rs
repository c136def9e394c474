// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handshake authentication.
//!
//! The [`SessionAuthenticator`] turns an optional `(keytab, principal)` pair
//! into handshake headers. Without credentials the headers are left alone;
//! with both it logs in and attaches a `Negotiate` token. Any login failure
//! is returned before the session sends a single byte.

pub mod keytab;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, instrument};

pub use keytab::{Keytab, KeytabEntry, KeytabLogin};

use crate::error::AuthError;

pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Header values attached to the session handshake.
pub type HandshakeHeaders = HashMap<String, String>;

/// Authentication decision for a daemon connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSettings {
    /// Explicitly unauthenticated
    Disabled,
    /// Keytab login; both halves must be present
    Kerberos {
        keytab: Option<PathBuf>,
        principal: Option<String>,
    },
}

impl AuthSettings {
    pub fn kerberos(keytab: impl Into<PathBuf>, principal: impl Into<String>) -> Self {
        AuthSettings::Kerberos {
            keytab: Some(keytab.into()),
            principal: Some(principal.into()),
        }
    }
}

/// Result of a successful login.
#[derive(Clone)]
pub struct SecurityContext {
    pub principal: String,
    pub kvno: u32,
    pub enctype: u16,
    pub established_at: DateTime<Utc>,
    pub session_key: Vec<u8>,
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("principal", &self.principal)
            .field("kvno", &self.kvno)
            .field("enctype", &self.enctype)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

type HmacSha256 = Hmac<Sha256>;

fn token_mac(
    key: &[u8],
    principal: &str,
    target: &str,
    issued_at_ms: i64,
) -> Result<HmacSha256, AuthError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| AuthError::Token(e.to_string()))?;
    mac.update(principal.as_bytes());
    mac.update(b"\n");
    mac.update(target.as_bytes());
    mac.update(b"\n");
    mac.update(issued_at_ms.to_string().as_bytes());
    Ok(mac)
}

/// Opaque handshake token, as carried in the `authorization` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub principal: String,
    pub target: String,
    pub issued_at_ms: i64,
    pub kvno: u32,
    /// Base64 HMAC-SHA256 over principal, target and issue time
    pub mac: String,
}

impl SessionToken {
    pub fn issue(
        context: &SecurityContext,
        target: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let issued_at_ms = issued_at.timestamp_millis();
        let mac = token_mac(
            &context.session_key,
            &context.principal,
            target,
            issued_at_ms,
        )?;
        Ok(Self {
            principal: context.principal.clone(),
            target: target.to_string(),
            issued_at_ms,
            kvno: context.kvno,
            mac: BASE64.encode(mac.finalize().into_bytes()),
        })
    }

    pub fn encode(&self) -> Result<String, AuthError> {
        let json = serde_json::to_vec(self).map_err(|e| AuthError::Token(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let json = BASE64
            .decode(token)
            .map_err(|e| AuthError::Token(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| AuthError::Token(e.to_string()))
    }

    /// Check the MAC against the principal's key (daemon side).
    pub fn verify(&self, key: &[u8]) -> Result<bool, AuthError> {
        let expected = BASE64
            .decode(&self.mac)
            .map_err(|e| AuthError::Token(e.to_string()))?;
        let mac = token_mac(key, &self.principal, &self.target, self.issued_at_ms)?;
        Ok(mac.verify_slice(&expected).is_ok())
    }
}

/// Performs the credential login. Swappable so other login mechanisms (or
/// test doubles) can stand in for the keytab reader.
#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn login(&self, keytab: &Path, principal: &str) -> Result<SecurityContext, AuthError>;
}

#[derive(Debug, Clone)]
struct Credentials {
    keytab: PathBuf,
    principal: String,
}

/// Builds handshake headers for a new session.
#[derive(Clone)]
pub struct SessionAuthenticator {
    credentials: Option<Credentials>,
    login: Arc<dyn LoginProvider>,
}

impl SessionAuthenticator {
    /// Fails when only one of `keytab` and `principal` is given.
    pub fn new(keytab: Option<PathBuf>, principal: Option<String>) -> Result<Self, AuthError> {
        let credentials = match (keytab, principal) {
            (None, None) => None,
            (Some(keytab), Some(principal)) => Some(Credentials { keytab, principal }),
            (Some(_), None) => {
                return Err(AuthError::PartialCredentials {
                    missing: "principal",
                    present: "keytab",
                });
            }
            (None, Some(_)) => {
                return Err(AuthError::PartialCredentials {
                    missing: "keytab",
                    present: "principal",
                });
            }
        };

        Ok(Self {
            credentials,
            login: Arc::new(KeytabLogin),
        })
    }

    pub fn disabled() -> Self {
        Self {
            credentials: None,
            login: Arc::new(KeytabLogin),
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthError> {
        match settings {
            AuthSettings::Disabled => Ok(Self::disabled()),
            AuthSettings::Kerberos { keytab, principal } => {
                Self::new(keytab.clone(), principal.clone())
            }
        }
    }

    pub fn with_login_provider(mut self, login: Arc<dyn LoginProvider>) -> Self {
        self.login = login;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn principal(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.principal.as_str())
    }

    /// Log in (when credentials are configured) and add the token to `headers`.
    #[instrument(skip(self, headers), fields(principal = self.principal()))]
    pub async fn apply(
        &self,
        target_uri: &str,
        headers: &mut HandshakeHeaders,
    ) -> Result<(), AuthError> {
        let Some(credentials) = &self.credentials else {
            debug!("no credentials configured, handshake stays unauthenticated");
            return Ok(());
        };

        let context = self
            .login
            .login(&credentials.keytab, &credentials.principal)
            .await?;
        let token = SessionToken::issue(&context, target_uri, Utc::now())?.encode()?;

        headers.insert(
            AUTHORIZATION_HEADER.to_string(),
            format!("Negotiate {}", token),
        );
        info!(principal = %context.principal, kvno = context.kvno, "handshake token attached");
        Ok(())
    }
}

impl fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuthenticator")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SecurityContext {
        SecurityContext {
            principal: "etl@EXAMPLE.COM".to_string(),
            kvno: 2,
            enctype: 18,
            established_at: Utc::now(),
            session_key: vec![9; 32],
        }
    }

    #[test]
    fn test_token_verifies_with_issuing_key_only() {
        let token = SessionToken::issue(&context(), "quic://daemon:53000", Utc::now()).unwrap();
        let decoded = SessionToken::decode(&token.encode().unwrap()).unwrap();

        assert_eq!(decoded, token);
        assert!(decoded.verify(&[9; 32]).unwrap());
        assert!(!decoded.verify(&[8; 32]).unwrap());
    }

    #[test]
    fn test_tampered_target_fails_verification() {
        let mut token = SessionToken::issue(&context(), "quic://a:1", Utc::now()).unwrap();
        token.target = "quic://b:1".to_string();
        assert!(!token.verify(&[9; 32]).unwrap());
    }

    #[test]
    fn test_partial_credentials_fail_fast() {
        assert!(matches!(
            SessionAuthenticator::new(Some("/tmp/x.keytab".into()), None),
            Err(AuthError::PartialCredentials {
                missing: "principal",
                ..
            })
        ));
        assert!(matches!(
            SessionAuthenticator::from_settings(&AuthSettings::Kerberos {
                keytab: None,
                principal: Some("etl".to_string()),
            }),
            Err(AuthError::PartialCredentials {
                missing: "keytab",
                ..
            })
        ));
    }

    #[test]
    fn test_debug_hides_session_key() {
        let rendered = format!("{:?}", context());
        assert!(rendered.contains("etl@EXAMPLE.COM"));
        assert!(!rendered.contains("session_key"));
    }
}
