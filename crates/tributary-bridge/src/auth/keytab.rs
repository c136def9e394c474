// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! MIT keytab (version 0x0502) reader and the default keytab login.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! u16 version (0x0502)
//! repeated:
//!   i32 size            negative = deleted hole of |size| bytes
//!   u16 component count
//!   u16 len + realm
//!   (u16 len + component) * count
//!   u32 name type
//!   u32 timestamp
//!   u8  key version
//!   u16 enctype, u16 len + key
//!   [u32 key version]   present on newer writers, overrides the u8 one
//! ```

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Buf, BufMut};
use chrono::Utc;
use tracing::{debug, instrument};

use super::{LoginProvider, SecurityContext};
use crate::error::AuthError;

pub const KEYTAB_VERSION: u16 = 0x0502;

/// Kerberos principal name type for a plain principal
pub const NT_PRINCIPAL: u32 = 1;

/// One key of one principal.
#[derive(Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    pub realm: String,
    pub components: Vec<String>,
    pub name_type: u32,
    /// Seconds since the epoch at which the key was written
    pub timestamp: u32,
    pub kvno: u32,
    pub enctype: u16,
    pub key: Vec<u8>,
}

impl KeytabEntry {
    pub fn new(principal: &str, kvno: u32, enctype: u16, key: Vec<u8>) -> Self {
        let (name, realm) = principal.rsplit_once('@').unwrap_or((principal, ""));
        Self {
            realm: realm.to_string(),
            components: name.split('/').map(str::to_string).collect(),
            name_type: NT_PRINCIPAL,
            timestamp: Utc::now().timestamp().max(0) as u32,
            kvno,
            enctype,
            key,
        }
    }

    /// Principal in `primary/instance@REALM` form.
    pub fn principal(&self) -> String {
        if self.realm.is_empty() {
            self.components.join("/")
        } else {
            format!("{}@{}", self.components.join("/"), self.realm)
        }
    }

    /// A principal given without realm matches any realm.
    fn matches(&self, principal: &str) -> bool {
        if principal.contains('@') {
            self.principal() == principal
        } else {
            self.components.join("/") == principal
        }
    }
}

impl fmt::Debug for KeytabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeytabEntry")
            .field("principal", &self.principal())
            .field("kvno", &self.kvno)
            .field("enctype", &self.enctype)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keytab {
    entries: Vec<KeytabEntry>,
}

fn malformed(reason: impl Into<String>) -> AuthError {
    AuthError::MalformedKeytab(reason.into())
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<(), AuthError> {
    if buf.remaining() < len {
        return Err(malformed(format!("truncated {}", what)));
    }
    Ok(())
}

fn read_data(buf: &mut &[u8], what: &str) -> Result<Vec<u8>, AuthError> {
    need(buf, 2, what)?;
    let len = buf.get_u16() as usize;
    need(buf, len, what)?;
    let data = buf[..len].to_vec();
    buf.advance(len);
    Ok(data)
}

fn read_string(buf: &mut &[u8], what: &str) -> Result<String, AuthError> {
    String::from_utf8(read_data(buf, what)?).map_err(|_| malformed(format!("{} is not UTF-8", what)))
}

fn parse_entry(mut record: &[u8]) -> Result<KeytabEntry, AuthError> {
    need(record, 2, "component count")?;
    let count = record.get_u16();
    let realm = read_string(&mut record, "realm")?;
    let components = (0..count)
        .map(|_| read_string(&mut record, "principal component"))
        .collect::<Result<Vec<_>, _>>()?;

    need(record, 9, "entry header")?;
    let name_type = record.get_u32();
    let timestamp = record.get_u32();
    let kvno8 = record.get_u8();

    need(record, 2, "enctype")?;
    let enctype = record.get_u16();
    let key = read_data(&mut record, "key")?;

    let kvno = if record.remaining() >= 4 {
        match record.get_u32() {
            0 => u32::from(kvno8),
            kvno => kvno,
        }
    } else {
        u32::from(kvno8)
    };

    Ok(KeytabEntry {
        realm,
        components,
        name_type,
        timestamp,
        kvno,
        enctype,
        key,
    })
}

impl Keytab {
    pub fn new(entries: Vec<KeytabEntry>) -> Self {
        Self { entries }
    }

    pub fn parse(data: &[u8]) -> Result<Self, AuthError> {
        let mut buf = data;
        need(buf, 2, "version header")?;
        let version = buf.get_u16();
        if version != KEYTAB_VERSION {
            return Err(malformed(format!(
                "unsupported keytab version {:#06x}",
                version
            )));
        }

        let mut entries = Vec::new();
        while buf.remaining() >= 4 {
            let size = buf.get_i32();
            if size == 0 {
                break;
            }
            let len = size.unsigned_abs() as usize;
            need(buf, len, "entry")?;
            let (record, rest) = buf.split_at(len);
            buf = rest;

            if size > 0 {
                entries.push(parse_entry(record)?);
            }
        }

        Ok(Self { entries })
    }

    #[instrument]
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| AuthError::KeytabRead {
                path: path.to_path_buf(),
                source,
            })?;
        let keytab = Self::parse(&data)?;
        debug!(entries = keytab.entries.len(), "keytab loaded");
        Ok(keytab)
    }

    pub fn entries(&self) -> &[KeytabEntry] {
        &self.entries
    }

    /// Entry with the highest key version for `principal`.
    pub fn find(&self, principal: &str) -> Option<&KeytabEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.matches(principal))
            .max_by_key(|entry| entry.kvno)
    }

    /// Serialize in the same format [`Keytab::parse`] reads.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(KEYTAB_VERSION);
        for entry in &self.entries {
            let mut record = Vec::new();
            record.put_u16(entry.components.len() as u16);
            record.put_u16(entry.realm.len() as u16);
            record.put_slice(entry.realm.as_bytes());
            for component in &entry.components {
                record.put_u16(component.len() as u16);
                record.put_slice(component.as_bytes());
            }
            record.put_u32(entry.name_type);
            record.put_u32(entry.timestamp);
            record.put_u8(entry.kvno.min(255) as u8);
            record.put_u16(entry.enctype);
            record.put_u16(entry.key.len() as u16);
            record.put_slice(&entry.key);
            record.put_u32(entry.kvno);

            out.put_i32(record.len() as i32);
            out.put_slice(&record);
        }
        out
    }
}

/// Logs in by looking the principal's long-term key up in a keytab file.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeytabLogin;

#[async_trait]
impl LoginProvider for KeytabLogin {
    async fn login(&self, keytab: &Path, principal: &str) -> Result<SecurityContext, AuthError> {
        let table = Keytab::load(keytab).await?;
        let entry = table
            .find(principal)
            .ok_or_else(|| AuthError::PrincipalNotFound {
                principal: principal.to_string(),
                path: keytab.to_path_buf(),
            })?;

        if entry.key.is_empty() {
            return Err(AuthError::Login(format!(
                "keytab entry for {} has an empty key",
                entry.principal()
            )));
        }

        Ok(SecurityContext {
            principal: entry.principal(),
            kvno: entry.kvno,
            enctype: entry.enctype,
            established_at: Utc::now(),
            session_key: entry.key.clone(),
        })
    }
}
