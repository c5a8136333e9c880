// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire shapes returned by the companion WP-CLI tool.
//!
//! These mirror the JSON emitted by `cron-control orchestrate get-info`,
//! `site list`, and `cron-control orchestrate list-due-batch`. Field names
//! follow the tool's output, not Rust convention.

use serde::Deserialize;

/// Instance-level info from `orchestrate get-info`.
///
/// The tool returns a single-element array of these.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceInfo {
    pub multisite: i64,
    pub siteurl: String,
    #[serde(default)]
    pub disabled: i64,
}

impl InstanceInfo {
    pub fn is_multisite(&self) -> bool {
        self.multisite == 1
    }
}

/// One site of the instance, from `site list` (or the single-site fallback).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Site {
    pub url: String,
}

/// A due cron event for one site.
///
/// `list-due-batch` output carries no `url`; the fetcher stamps it with the
/// site the batch was requested for before the event enters the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub url: String,
    pub timestamp: i64,
    pub action: String,
    pub instance: String,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
