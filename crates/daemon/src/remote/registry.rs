// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The live-session registry.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use wpr_core::SessionId;

use super::session::Session;

#[derive(Debug, Error)]
#[error("session '{0}' already registered")]
pub(crate) struct DuplicateSession(pub SessionId);

/// Mapping from session id to live session. At most one entry per id;
/// critical sections are limited to lookup, insert, and remove.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn insert(&self, session: Arc<Session>) -> Result<(), DuplicateSession> {
        let mut sessions = self.sessions.lock();
        match sessions.entry(session.id().clone()) {
            Entry::Occupied(_) => Err(DuplicateSession(session.id().clone())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().remove(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
