// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identifier type for remote WP-CLI sessions.
//!
//! Clients supply the id in the handshake; it keys the session registry and
//! names the per-session log file, so the accepted alphabet is restricted to
//! hex digits and dashes (GUID-shaped, but any length).

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Rejected session identifier.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("incorrect GUID format")]
pub struct SessionIdError;

/// Unique identifier for a remote session, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Parse a client-supplied id. Must be non-empty and consist only of
    /// ASCII hex digits and `-`.
    pub fn parse(id: &str) -> Result<Self, SessionIdError> {
        if id.is_empty() {
            return Err(SessionIdError);
        }
        if !id.bytes().all(|b| b.is_ascii_hexdigit() || b == b'-') {
            return Err(SessionIdError);
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq<str> for SessionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SessionId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
