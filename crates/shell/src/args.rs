// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Argument tokenization for validated commands.

use crate::error::ValidationError;

/// Split a command string into the argument vector for the WP-CLI process.
///
/// Tokens are whitespace-separated, except that a token containing a single
/// `"` opens (or closes) a quoted span; everything inside the span becomes
/// one argument, re-joined with single spaces. A token containing two `"`
/// characters is passed through verbatim. A span still open at end of input
/// rejects the whole command.
pub fn tokenize_arguments(command: &str) -> Result<Vec<String>, ValidationError> {
    let mut args: Vec<String> = Vec::new();
    let mut span: Option<String> = None;

    for raw in command.split_whitespace() {
        match raw.matches('"').count() {
            // Self-contained quoting ("--a=b" or "x") passes through whole,
            // without touching any open span.
            q if q >= 2 => args.push(raw.to_string()),
            1 => match span.take() {
                None => span = Some(raw.to_string()),
                Some(mut open) => {
                    open.push(' ');
                    open.push_str(raw);
                    args.push(open);
                }
            },
            _ => match &mut span {
                None => args.push(raw.to_string()),
                Some(open) => {
                    open.push(' ');
                    open.push_str(raw);
                }
            },
        }
    }

    if span.is_some() {
        return Err(ValidationError::InvalidArguments { command: command.to_string() });
    }

    Ok(args)
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
