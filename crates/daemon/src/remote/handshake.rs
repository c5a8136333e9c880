// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The line-oriented connection handshake.
//!
//! One line, five `;`-separated fields: `token;session_id;rows;cols;command`,
//! terminated by `\n` (`\r\n` accepted). Nothing past the newline is
//! consumed — the same connection carries raw session bytes afterwards.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wpr_core::SessionId;

/// Upper bound on the handshake line, token and command included.
const MAX_LINE: usize = 4096;

/// Reply written before closing on a malformed session id.
const BAD_GUID_REPLY: &[u8] = b"error incorrect GUID format";

#[derive(Debug, Error)]
pub(crate) enum HandshakeError {
    #[error("connection closed during handshake")]
    Closed,

    #[error("handshake read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake line too long")]
    LineTooLong,

    #[error("handshake line is not valid UTF-8")]
    Encoding,

    #[error("handshake format incorrect")]
    Format,

    #[error("handshake token mismatch")]
    BadToken,

    #[error("incorrect GUID format")]
    BadSessionId,

    #[error("incorrect console {field} setting")]
    BadGeometry { field: &'static str },
}

/// A validated handshake. The command is still unvalidated text; admission
/// happens against the blacklists only when the session is new.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Handshake {
    pub session_id: SessionId,
    pub rows: u16,
    pub cols: u16,
    pub command: String,
}

/// Read and validate the handshake line.
///
/// A malformed session id is answered with `error incorrect GUID format`
/// before the error returns; every other rejection closes silently.
pub(crate) async fn read_handshake<S>(
    stream: &mut S,
    token: &str,
) -> Result<Handshake, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = read_line(stream).await?;
    match parse_line(&line, token) {
        Err(HandshakeError::BadSessionId) => {
            let _ = stream.write_all(BAD_GUID_REPLY).await;
            Err(HandshakeError::BadSessionId)
        }
        other => other,
    }
}

/// Read up to the first `\n`, one byte at a time so no session bytes are
/// consumed from the stream.
async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, HandshakeError> {
    let mut line = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).await? == 0 {
            return Err(HandshakeError::Closed);
        }
        if byte[0] == b'\n' {
            return Ok(line);
        }
        if line.len() == MAX_LINE {
            return Err(HandshakeError::LineTooLong);
        }
        line.push(byte[0]);
    }
}

fn parse_line(line: &[u8], token: &str) -> Result<Handshake, HandshakeError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|_| HandshakeError::Encoding)?;

    let fields: Vec<&str> = text.split(';').collect();
    let &[given_token, id, rows, cols, command] = fields.as_slice() else {
        return Err(HandshakeError::Format);
    };

    if !constant_time_eq(given_token.as_bytes(), token.as_bytes()) {
        return Err(HandshakeError::BadToken);
    }

    let session_id = SessionId::parse(id).map_err(|_| HandshakeError::BadSessionId)?;

    let rows: u16 = rows
        .parse()
        .map_err(|_| HandshakeError::BadGeometry { field: "rows" })?;
    let cols: u16 = cols
        .parse()
        .map_err(|_| HandshakeError::BadGeometry { field: "cols" })?;

    Ok(Handshake {
        session_id,
        rows,
        cols,
        command: command.to_string(),
    })
}

/// Token comparison must not leak where the first differing byte is. The
/// length itself is not secret.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
