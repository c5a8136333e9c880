// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw-mode handling for the PTY master.

use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::termios::{self, SetArg, Termios};

/// Put the terminal behind `fd` into raw mode, returning the prior state.
pub(crate) fn make_raw(fd: RawFd) -> nix::Result<Termios> {
    let fd = borrow_fd(fd);
    let prev = termios::tcgetattr(&fd)?;
    let mut raw = prev.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(&fd, SetArg::TCSANOW, &raw)?;
    Ok(prev)
}

/// Restore a previously saved terminal state.
pub(crate) fn restore(fd: RawFd, prev: &Termios) {
    if let Err(e) = termios::tcsetattr(&borrow_fd(fd), SetArg::TCSANOW, prev) {
        tracing::warn!(error = %e, "terminal state restore failed");
    }
}

// Invariant: callers only pass the fd of a PTY master they keep open for
// the duration of the call.
#[allow(unsafe_code)]
fn borrow_fd(fd: RawFd) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}
