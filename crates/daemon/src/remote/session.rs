// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The remote session runtime.
//!
//! A session is one WP-CLI child on a PTY. A tee thread appends everything
//! the child writes to the session log and advances `bytes_logged`; a
//! per-connection stream task follows the log and advances `bytes_streamed`
//! as it forwards bytes to the client. Reattaching opens the log at
//! `bytes_streamed` and catches up before going live, so a dropped
//! connection loses nothing.
//!
//! At most one client is attached at a time. Attachment is claimed per
//! connection with an epoch; the stream task owns the claim and releases it
//! when it exits, so a new claim can never overlap a live streamer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::fcntl::OFlag;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use wpr_core::SessionId;

use super::handshake::Handshake;
use super::registry::DuplicateSession;
use super::tailer::{LogTailer, TailSignal};
use super::{pty, RemoteCtx};

const IO_BUF: usize = 8192;
const DRAIN_POLL: Duration = Duration::from_secs(1);

/// A lone 0x03 from the client kills the child.
const INTERRUPT: u8 = 0x03;
/// UTF-8 encoding of CSI `8;`, opening a `<rows>;<cols>t` resize frame.
const RESIZE_PREFIX: [u8; 4] = [0xc2, 0x9b, 0x38, 0x3b];

const LAUNCH_FAILED_REPLY: &[u8] = b"unable to launch the remote WP CLI process";
const ATTACHED_REPLY: &[u8] = b"session already attached";

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("unable to open session logfile {path}: {source}")]
    LogFile {
        path: String,
        source: std::io::Error,
    },

    #[error("unable to open pty: {0}")]
    Pty(anyhow::Error),

    #[error("unable to spawn WP CLI: {0}")]
    Spawn(anyhow::Error),

    #[error("unable to initialize the session terminal: {0}")]
    Terminal(nix::Error),

    #[error(transparent)]
    Tail(#[from] super::tailer::TailError),

    /// Another connection launched this id first; attach to that session.
    #[error("session launched concurrently")]
    Duplicate,
}

/// Which connection currently owns the session's single client slot.
#[derive(Default)]
struct AttachState {
    attached: bool,
    epoch: u64,
    detach_requested: bool,
}

/// One live session. Shared between the registry, the connection handlers,
/// and the session's own tasks.
pub(crate) struct Session {
    id: SessionId,
    log_path: PathBuf,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    bytes_logged: AtomicU64,
    bytes_streamed: AtomicU64,
    running: AtomicBool,
    attach: Mutex<AttachState>,
    /// Signaled whenever counters or attach state change.
    progress: Notify,
}

impl Session {
    fn new(
        id: SessionId,
        log_path: PathBuf,
        master: Box<dyn MasterPty + Send>,
        writer: Box<dyn Write + Send>,
        killer: Box<dyn ChildKiller + Send + Sync>,
    ) -> Self {
        Self {
            id,
            log_path,
            master: Mutex::new(master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            bytes_logged: AtomicU64::new(0),
            bytes_streamed: AtomicU64::new(0),
            running: AtomicBool::new(true),
            attach: Mutex::new(AttachState::default()),
            progress: Notify::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    fn counters(&self) -> (u64, u64) {
        (
            self.bytes_logged.load(Ordering::Acquire),
            self.bytes_streamed.load(Ordering::Acquire),
        )
    }

    fn add_logged(&self, n: u64) {
        self.bytes_logged.fetch_add(n, Ordering::AcqRel);
        self.progress.notify_waiters();
    }

    fn add_streamed(&self, n: u64) {
        self.bytes_streamed.fetch_add(n, Ordering::AcqRel);
        self.progress.notify_waiters();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn mark_exited(&self) {
        self.running.store(false, Ordering::Release);
        self.progress.notify_waiters();
    }

    /// Claim the single client slot. Returns the claim's epoch, or `None`
    /// while another connection holds it.
    fn claim(&self) -> Option<u64> {
        let mut attach = self.attach.lock();
        if attach.attached {
            return None;
        }
        attach.attached = true;
        attach.epoch += 1;
        attach.detach_requested = false;
        Some(attach.epoch)
    }

    /// Ask the claim's streamer to wind down (client input hit EOF).
    fn request_detach(&self, epoch: u64) {
        let mut attach = self.attach.lock();
        if attach.epoch == epoch && attach.attached {
            attach.detach_requested = true;
        }
        drop(attach);
        self.progress.notify_waiters();
    }

    fn detach_requested(&self, epoch: u64) -> bool {
        let attach = self.attach.lock();
        attach.epoch == epoch && attach.detach_requested
    }

    /// Release the claim. Only the streamer that owns `epoch` calls this,
    /// which is what guarantees streamers never overlap.
    fn release(&self, epoch: u64) {
        let mut attach = self.attach.lock();
        if attach.epoch == epoch {
            attach.attached = false;
        }
        drop(attach);
        self.progress.notify_waiters();
    }

    fn is_attached(&self) -> bool {
        self.attach.lock().attached
    }

    fn resize(&self, rows: u16, cols: u16) {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        match self.master.lock().resize(size) {
            Ok(()) => info!(session = %self.id, rows, cols, "resized session terminal"),
            Err(e) => warn!(session = %self.id, error = %e, "terminal resize failed"),
        }
    }

    fn kill_child(&self) -> std::io::Result<()> {
        self.killer.lock().kill()
    }

    fn write_input(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()
    }

    /// Wait until every logged byte has been streamed, or the client is
    /// gone. Called after the child exited, so `bytes_logged` is final.
    async fn drain(&self) {
        loop {
            let (logged, streamed) = self.counters();
            if streamed >= logged || !self.is_attached() {
                return;
            }
            let _ = tokio::time::timeout(DRAIN_POLL, self.progress.notified()).await;
        }
    }
}

/// Launch a new session and serve the launching connection until the child
/// exits and its output has drained.
pub(crate) async fn launch<R, W>(
    ctx: Arc<RemoteCtx>,
    hs: Handshake,
    command: String,
    reader: R,
    mut writer: W,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let args = match wpr_shell::tokenize_arguments(&command) {
        Ok(args) => args,
        Err(e) => {
            info!(session = %hs.session_id, error = %e, "command arguments rejected");
            let _ = writer.write_all(b"WP CLI command is invalid").await;
            return;
        }
    };
    let mut wp_args = vec![format!("--path={}", ctx.config.wp_path.display())];
    wp_args.extend(args);

    info!(
        session = %hs.session_id,
        rows = hs.rows,
        cols = hs.cols,
        args = ?wp_args,
        "launching remote session"
    );

    match start_session(&ctx, &hs, wp_args) {
        Ok(parts) => serve_launched(ctx, parts, reader, writer).await,
        Err(SessionError::Duplicate) => match ctx.registry.lookup(hs.session_id.as_str()) {
            Some(live) => reattach(live, &hs, reader, writer).await,
            None => {
                let _ = writer.write_all(LAUNCH_FAILED_REPLY).await;
            }
        },
        Err(e) => {
            error!(session = %hs.session_id, error = %e, "session launch failed");
            let _ = writer.write_all(LAUNCH_FAILED_REPLY).await;
        }
    }
}

/// Everything `start_session` wires up before the connection tasks start.
struct Launched {
    session: Arc<Session>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    tee: tokio::task::JoinHandle<()>,
    tailer: LogTailer,
    epoch: u64,
    prev_termios: Option<nix::sys::termios::Termios>,
}

fn start_session(
    ctx: &Arc<RemoteCtx>,
    hs: &Handshake,
    wp_args: Vec<String>,
) -> Result<Launched, SessionError> {
    let log_path = ctx.config.session_log_path(hs.session_id.as_str());
    if log_path.exists() {
        info!(path = %log_path.display(), "removing existing session logfile");
        if let Err(e) = std::fs::remove_file(&log_path) {
            warn!(path = %log_path.display(), error = %e, "unable to remove stale logfile");
        }
    }
    let log_file = open_sync_append(&log_path)?;

    // The watcher must exist before the child can write anything.
    let tailer = LogTailer::open(&log_path, 0)?;

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: hs.rows,
            cols: hs.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(SessionError::Pty)?;

    let mut cmd = CommandBuilder::new(&ctx.config.cli_path);
    cmd.args(&wp_args);
    cmd.env("TERM", "xterm-256color");

    let child = pair.slave.spawn_command(cmd).map_err(SessionError::Spawn)?;
    drop(pair.slave);

    let master = pair.master;
    let prev_termios = match master.as_raw_fd() {
        Some(fd) => match pty::make_raw(fd) {
            Ok(prev) => Some(prev),
            Err(e) => {
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::Terminal(e));
            }
        },
        None => None,
    };

    let killer = child.clone_killer();
    let pty_reader = master.try_clone_reader().map_err(SessionError::Pty)?;
    let pty_writer = master.take_writer().map_err(SessionError::Pty)?;

    let session = Arc::new(Session::new(
        hs.session_id.clone(),
        log_path,
        master,
        pty_writer,
        killer,
    ));

    let Some(epoch) = session.claim() else {
        // Freshly constructed; the slot cannot be held.
        unreachable!("new session already attached")
    };

    if let Err(DuplicateSession(id)) = ctx.registry.insert(Arc::clone(&session)) {
        // Lost a launch race for this id; kill our child and defer to the
        // session that won.
        warn!(session = %id, "concurrent launch for session id, deferring");
        let _ = session.kill_child();
        let mut child = child;
        let _ = child.wait();
        return Err(SessionError::Duplicate);
    }

    let tee = spawn_tee(Arc::clone(&session), pty_reader, log_file);

    Ok(Launched {
        session,
        child,
        tee,
        tailer,
        epoch,
        prev_termios,
    })
}

async fn serve_launched<R, W>(ctx: Arc<RemoteCtx>, parts: Launched, reader: R, writer: W)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Launched {
        session,
        child,
        tee,
        tailer,
        epoch,
        prev_termios,
    } = parts;

    let streamer = tokio::spawn(stream_to_client(
        Arc::clone(&session),
        tailer,
        writer,
        epoch,
    ));
    let input = tokio::spawn(client_input(Arc::clone(&session), reader, epoch));

    let status = tokio::task::spawn_blocking(move || {
        let mut child = child;
        child.wait()
    })
    .await;
    match status {
        Ok(Ok(status)) => {
            info!(session = %session.id(), code = status.exit_code(), "session child exited")
        }
        Ok(Err(e)) => warn!(session = %session.id(), error = %e, "child wait failed"),
        Err(e) => warn!(session = %session.id(), error = %e, "child wait task failed"),
    }

    session.mark_exited();
    // The child is gone; make sure nothing lingers behind the PTY.
    let _ = session.kill_child();

    // The tee ends on PTY EOF; once it has, `bytes_logged` is final and the
    // drain below cannot under-count.
    if tokio::time::timeout(Duration::from_secs(30), tee).await.is_err() {
        warn!(session = %session.id(), "tee did not finish after child exit");
    }

    session.drain().await;

    ctx.registry.remove(session.id().as_str());
    if let Some(prev) = prev_termios {
        if let Some(fd) = session.master.lock().as_raw_fd() {
            pty::restore(fd, &prev);
        }
    }

    input.abort();
    let _ = tokio::time::timeout(Duration::from_secs(5), streamer).await;
    info!(session = %session.id(), "session closed");
}

/// Attach a new connection to a live session: resize, replay the log from
/// the last streamed byte, then follow live output.
pub(crate) async fn reattach<R, W>(session: Arc<Session>, hs: &Handshake, reader: R, mut writer: W)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Some(epoch) = session.claim() else {
        info!(session = %session.id(), "rejecting second concurrent client");
        let _ = writer.write_all(ATTACHED_REPLY).await;
        return;
    };

    info!(
        session = %session.id(),
        rows = hs.rows,
        cols = hs.cols,
        "reattaching client"
    );
    session.resize(hs.rows, hs.cols);

    let offset = session.bytes_streamed.load(Ordering::Acquire);
    let tailer = match LogTailer::open(&session.log_path, offset) {
        Ok(tailer) => tailer,
        Err(e) => {
            error!(session = %session.id(), error = %e, "unable to reopen session log");
            session.release(epoch);
            let _ = writer.write_all(LAUNCH_FAILED_REPLY).await;
            return;
        }
    };

    let input = tokio::spawn(client_input(Arc::clone(&session), reader, epoch));
    stream_to_client(Arc::clone(&session), tailer, writer, epoch).await;
    input.abort();
}

/// Tee: PTY output goes to the log first, then the counter advances, so
/// `bytes_streamed` can never observe bytes the log does not have. Runs on
/// a blocking thread; the PTY reader has no async form.
fn spawn_tee(
    session: Arc<Session>,
    mut reader: Box<dyn Read + Send>,
    mut log_file: File,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; IO_BUF];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = log_file.write_all(&buf[..n]) {
                        error!(session = %session.id(), error = %e, "session log write failed");
                    }
                    session.add_logged(n as u64);
                }
                // The master reports an error once the child side closes.
                Err(e) => {
                    debug!(session = %session.id(), error = %e, "pty read ended");
                    break;
                }
            }
        }
        debug!(session = %session.id(), "tee finished");
    })
}

/// Stream task: drain the log to the client, then sleep until the log
/// changes. Owns the connection's attach claim.
async fn stream_to_client<W: AsyncWrite + Unpin>(
    session: Arc<Session>,
    mut tailer: LogTailer,
    mut writer: W,
    epoch: u64,
) {
    loop {
        // Drain to the current end of file.
        loop {
            if session.detach_requested(epoch) {
                session.release(epoch);
                return;
            }
            match tailer.read_chunk() {
                Ok(None) => break,
                Ok(Some(chunk)) => {
                    let len = chunk.len() as u64;
                    if let Err(e) = writer.write_all(chunk).await {
                        debug!(session = %session.id(), error = %e, "client write failed");
                        session.release(epoch);
                        return;
                    }
                    session.add_streamed(len);
                }
                Err(e) => {
                    warn!(session = %session.id(), error = %e, "session log read failed");
                    break;
                }
            }
        }
        let _ = writer.flush().await;

        let (logged, streamed) = session.counters();
        if !session.is_running() && streamed >= logged {
            break;
        }
        if session.detach_requested(epoch) {
            break;
        }

        tokio::select! {
            signal = tailer.wait() => {
                if signal == TailSignal::Deleted {
                    debug!(session = %session.id(), "session logfile deleted");
                    break;
                }
            }
            _ = session.progress.notified() => {}
        }
    }

    let _ = writer.flush().await;
    session.release(epoch);
    debug!(session = %session.id(), "stream finished");
}

/// Client-input task: interrupt and resize frames are interpreted, anything
/// else goes to the PTY verbatim.
async fn client_input<R: AsyncRead + Unpin>(session: Arc<Session>, mut reader: R, epoch: u64) {
    let mut buf = [0u8; IO_BUF];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(session = %session.id(), error = %e, "client read failed");
                break;
            }
        };
        let data = &buf[..n];

        if n == 1 && data[0] == INTERRUPT {
            info!(session = %session.id(), "interrupt received, killing session child");
            if let Err(e) = session.kill_child() {
                warn!(session = %session.id(), error = %e, "child kill failed");
            }
            return;
        }

        if data.starts_with(&RESIZE_PREFIX) {
            match parse_resize(data) {
                Some((rows, cols)) => session.resize(rows, cols),
                None => {
                    warn!(session = %session.id(), "ignoring malformed resize escape")
                }
            }
            continue;
        }

        if let Err(e) = session.write_input(data) {
            warn!(session = %session.id(), error = %e, "pty write failed");
            break;
        }
    }
    session.request_detach(epoch);
}

/// Parse a `<prefix><rows>;<cols>t` resize frame.
fn parse_resize(frame: &[u8]) -> Option<(u16, u16)> {
    let payload = frame.strip_prefix(RESIZE_PREFIX.as_slice())?;
    let payload = payload.strip_suffix(b"t")?;
    let text = std::str::from_utf8(payload).ok()?;
    let (rows, cols) = text.split_once(';')?;
    Some((rows.parse().ok()?, cols.parse().ok()?))
}

/// Session logs are written with synchronous semantics so the tailer's
/// change notifications always find the bytes on disk.
fn open_sync_append(path: &Path) -> Result<File, SessionError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .custom_flags(OFlag::O_SYNC.bits())
        .open(path)
        .map_err(|source| SessionError::LogFile {
            path: path.display().to_string(),
            source,
        })
}


#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
