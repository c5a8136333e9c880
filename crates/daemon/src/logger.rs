// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing subscriber installation.
//!
//! Logger-setup failure is fatal at process scope; everything downstream
//! assumes a working subscriber.

use std::fs::OpenOptions;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogDest;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unable to open log file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
}

/// Install the global subscriber. The returned guard must be held for the
/// process lifetime so the non-blocking file writer flushes on exit.
pub fn init(dest: &LogDest) -> Result<Option<WorkerGuard>, LoggerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match dest {
        LogDest::Stdout => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
        LogDest::File(path) => {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|source| LoggerError::Open {
                    path: path.display().to_string(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
    }
}
