// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for command admission.
//!
//! The `Display` text of each variant is written verbatim to the remote
//! client, so the wording is part of the wire contract.

use thiserror::Error;

/// A rejected remote command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The command string was empty after trimming.
    #[error("No WP CLI command specified")]
    EmptyCommand,

    /// The first token is on the first-level blacklist.
    #[error("WP CLI command '{command}' is not permitted")]
    ForbiddenCommand { command: String },

    /// The `(first, second)` token pair is on the second-level blacklist.
    #[error("WP CLI command '{command} {subcommand}' is not permitted")]
    ForbiddenSubcommand { command: String, subcommand: String },

    /// A double-quoted span was still open at end of input.
    #[error("WP CLI command is invalid: {command}")]
    InvalidArguments { command: String },
}
