// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration, resolved once at startup from the command line.

use std::path::{Path, PathBuf};

/// Where the daemon's own log lines go.
///
/// The literal flag value `os.Stdout` selects standard output; anything else
/// is resolved to an absolute path and opened for append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDest {
    Stdout,
    File(PathBuf),
}

/// Sentinel flag value that selects stdout logging.
pub const STDOUT_SENTINEL: &str = "os.Stdout";

impl LogDest {
    pub fn parse(raw: &str) -> std::io::Result<Self> {
        if raw == STDOUT_SENTINEL {
            Ok(Self::Stdout)
        } else {
            Ok(Self::File(std::path::absolute(raw)?))
        }
    }

    /// Directory that holds per-session log files: `/tmp` when logging to
    /// stdout, otherwise the main log's directory.
    pub fn session_log_dir(&self) -> PathBuf {
        match self {
            Self::Stdout => PathBuf::from("/tmp"),
            Self::File(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/")),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the WP-CLI binary
    pub cli_path: PathBuf,
    /// Path to the WordPress installation
    pub wp_path: PathBuf,
    /// Number of event-fetch workers per discovery cycle
    pub workers_get: usize,
    /// Number of event-run workers
    pub workers_run: usize,
    /// Destination of the daemon log
    pub log_dest: LogDest,
    /// Network id appended to `orchestrate run` invocations
    pub network: Option<u64>,
    /// Shared token required in the remote handshake
    pub token: Option<String>,
}

impl Config {
    /// Log file for one remote session.
    pub fn session_log_path(&self, session_id: &str) -> PathBuf {
        self.log_dest
            .session_log_dir()
            .join(format!("wp-cli-{session_id}"))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
