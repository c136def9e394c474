// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event registry: fans inbound daemon messages out to registered handlers.
//!
//! One registry is created per execution and shared by reference between the
//! adapters that register handlers and the session receive path that fires
//! events. Handlers for the same key always run in registration order.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{HandlerError, RegistryError};
use crate::types::{EventKey, Message};

/// Receiver of messages fired for the key(s) it is registered under.
pub trait EventHandler: Send + Sync {
    /// Identifier, unique per key
    fn id(&self) -> &str;

    fn execute(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Handler backed by a closure.
pub struct FnHandler<F> {
    id: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }

    /// Build the handler already wrapped for registration.
    pub fn shared(id: impl Into<String>, f: F) -> Arc<dyn EventHandler> {
        Arc::new(Self::new(id, f))
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(&self, message: &Message) -> Result<(), HandlerError> {
        (self.f)(message)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("id", &self.id).finish()
    }
}

/// Thread-safe table of handlers keyed by event identity.
#[derive(Default)]
pub struct EventRegistry {
    handlers: DashMap<EventKey, Vec<Arc<dyn EventHandler>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`, after any handlers already there.
    ///
    /// Fails without touching the registry when the key is malformed, the
    /// handler has an empty identifier, or a handler with the same
    /// identifier is already registered under `key`.
    pub fn add_handler(
        &self,
        key: EventKey,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), RegistryError> {
        if !key.is_well_formed() {
            return Err(RegistryError::HandlerRegistration(format!(
                "malformed event key {}",
                key
            )));
        }
        if handler.id().is_empty() {
            return Err(RegistryError::HandlerRegistration(format!(
                "handler for {} has an empty identifier",
                key
            )));
        }

        // The shard stays locked between the duplicate check and the push.
        let mut entry = self.handlers.entry(key).or_default();
        if entry.iter().any(|existing| existing.id() == handler.id()) {
            return Err(RegistryError::HandlerRegistration(format!(
                "handler {} is already registered for {}",
                handler.id(),
                entry.key()
            )));
        }

        debug!(key = %entry.key(), handler = handler.id(), "handler registered");
        entry.push(handler);
        Ok(())
    }

    /// Handlers registered under `key`, in registration order.
    pub fn handlers_for(&self, key: &EventKey) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn has_handlers(&self, key: &EventKey) -> bool {
        self.handlers
            .get(key)
            .is_some_and(|entry| !entry.is_empty())
    }

    /// Deliver `message` to every handler registered for its key.
    ///
    /// Returns the number of handlers that completed successfully. When a
    /// handler fails the remaining handlers still run, and a single
    /// [`RegistryError::FireEvent`] is returned afterwards.
    pub fn fire_event(&self, message: &Message) -> Result<usize, RegistryError> {
        let key = message.key();
        if !key.is_well_formed() {
            return Err(RegistryError::FireEvent {
                key: key.to_string(),
                reason: "message has a malformed source".to_string(),
                failed_handlers: Vec::new(),
                cause: None,
            });
        }

        // Snapshot so handlers may (un)register without holding the shard.
        let handlers = self.handlers_for(&key);
        if handlers.is_empty() {
            debug!(%key, "no handlers for event");
            return Ok(0);
        }

        let mut delivered = 0;
        let mut failed_handlers = Vec::new();
        let mut cause = None;

        for handler in &handlers {
            match handler.execute(message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%key, handler = handler.id(), error = %e, "event handler failed");
                    failed_handlers.push(handler.id().to_string());
                    cause.get_or_insert(e);
                }
            }
        }

        if failed_handlers.is_empty() {
            debug!(%key, delivered, "event dispatched");
            Ok(delivered)
        } else {
            Err(RegistryError::FireEvent {
                reason: format!(
                    "{} of {} handlers failed",
                    failed_handlers.len(),
                    handlers.len()
                ),
                key: key.to_string(),
                failed_handlers,
                cause,
            })
        }
    }

    /// Remove one handler. Returns whether it was registered.
    pub fn remove_handler(&self, key: &EventKey, handler_id: &str) -> bool {
        let removed = match self.handlers.get_mut(key) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|handler| handler.id() != handler_id);
                before != entry.len()
            }
            None => false,
        };
        self.handlers.remove_if(key, |_, handlers| handlers.is_empty());
        removed
    }

    /// Remove every handler registered under `key`, returning how many there were.
    pub fn remove_handlers(&self, key: &EventKey) -> usize {
        self.handlers
            .remove(key)
            .map(|(_, handlers)| handlers.len())
            .unwrap_or(0)
    }

    /// Number of keys with at least one handler.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("keys", &self.handlers.len())
            .finish()
    }
}
