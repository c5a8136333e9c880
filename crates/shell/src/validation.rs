// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Blacklist-based command admission.

use crate::error::ValidationError;

/// Subcommands that are never allowed, whatever follows them.
const BLACKLISTED_FIRST_LEVEL: &[&str] = &[
    "admin",
    "cli",
    "config",
    "core",
    "db",
    "dist-archive",
    "eval-file",
    "eval",
    "find",
    "i18n",
    "scaffold",
    "server",
    "package",
    "profile",
];

/// `(command, subcommand)` pairs that are never allowed.
const BLACKLISTED_SECOND_LEVEL: &[(&str, &[&str])] = &[
    ("media", &["regenerate"]),
    ("theme", &["install", "update", "delete"]),
    ("plugin", &["install", "update", "delete"]),
    ("language", &["install", "update", "delete"]),
    ("vip", &["support-user"]),
];

/// Validate a raw remote command and normalize its whitespace.
///
/// Trims the input, splits on runs of whitespace, checks the first token
/// (and, when present, the first two tokens) against the blacklists
/// case-insensitively, and returns the tokens re-joined with single spaces.
pub fn validate(command: &str) -> Result<String, ValidationError> {
    let parts: Vec<&str> = command.split_whitespace().collect();

    let Some(&first) = parts.first() else {
        return Err(ValidationError::EmptyCommand);
    };
    let first_lower = first.to_lowercase();

    if BLACKLISTED_FIRST_LEVEL.contains(&first_lower.as_str()) {
        return Err(ValidationError::ForbiddenCommand { command: first_lower });
    }

    if let Some(&second) = parts.get(1) {
        let second_lower = second.to_lowercase();
        for (cmd, subs) in BLACKLISTED_SECOND_LEVEL {
            if first_lower == *cmd && subs.contains(&second_lower.as_str()) {
                return Err(ValidationError::ForbiddenSubcommand {
                    command: first_lower,
                    subcommand: second_lower,
                });
            }
        }
    }

    Ok(parts.join(" "))
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;
