// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log tailer: sequential drain plus change-driven follow of a session log.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver};

pub(crate) const TAIL_BUF: usize = 8192;

/// A missed notification only delays the tail until the next poll.
const POLL_FALLBACK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub(crate) enum TailError {
    #[error("unable to watch {path}: {source}")]
    Watch {
        path: String,
        source: notify::Error,
    },

    #[error("unable to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TailSignal {
    /// The file may have grown (or the poll fallback fired).
    Changed,
    /// The file was deleted; the tail is over.
    Deleted,
}

/// Follows one file from a starting offset: drain sequentially with
/// [`read_chunk`](Self::read_chunk), then block on [`wait`](Self::wait)
/// until the next change.
pub(crate) struct LogTailer {
    file: File,
    buf: Box<[u8; TAIL_BUF]>,
    events: Receiver<TailSignal>,
    _watcher: RecommendedWatcher,
}

impl LogTailer {
    /// Open `path` positioned at `start_offset`. The watcher is registered
    /// before the file is opened so no change slips between the two.
    pub fn open(path: &Path, start_offset: u64) -> Result<Self, TailError> {
        let (tx, events) = mpsc::channel(16);
        let target: PathBuf = path.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
                let Ok(event) = res else { return };
                if !event.paths.iter().any(|p| p == &target) {
                    return;
                }
                let signal = match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) => TailSignal::Changed,
                    EventKind::Remove(_) => TailSignal::Deleted,
                    _ => return,
                };
                let _ = tx.blocking_send(signal);
            })
            .map_err(|source| TailError::Watch {
                path: path.display().to_string(),
                source,
            })?;

        // Watch the parent directory; watching the file itself would lose
        // the ability to see its removal.
        let dir = path.parent().unwrap_or_else(|| Path::new("/"));
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| TailError::Watch {
                path: path.display().to_string(),
                source,
            })?;

        let mut file = File::open(path).map_err(|source| TailError::Open {
            path: path.display().to_string(),
            source,
        })?;
        file.seek(SeekFrom::Start(start_offset))
            .map_err(|source| TailError::Open {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            file,
            buf: Box::new([0u8; TAIL_BUF]),
            events,
            _watcher: watcher,
        })
    }

    /// The next chunk at the current offset, or `None` at end-of-file.
    /// Zero-length reads are expected: the change notification can precede
    /// the write completing.
    pub fn read_chunk(&mut self) -> std::io::Result<Option<&[u8]>> {
        let n = self.file.read(&mut self.buf[..])?;
        Ok(if n == 0 { None } else { Some(&self.buf[..n]) })
    }

    /// Wait for the next change signal, with a poll fallback.
    pub async fn wait(&mut self) -> TailSignal {
        match tokio::time::timeout(POLL_FALLBACK, self.events.recv()).await {
            Ok(Some(signal)) => signal,
            // Watcher gone or no event in time: fall back to polling.
            Ok(None) => TailSignal::Changed,
            Err(_) => TailSignal::Changed,
        }
    }
}

#[cfg(test)]
#[path = "tailer_tests.rs"]
mod tests;
