// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WP-CLI invocation.
//!
//! Everything the daemon asks of WordPress goes through [`CliInvoker`];
//! the pipeline and site source take it as a trait object so tests can
//! script responses without a WordPress install.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unable to spawn {cli}: {source}")]
    Spawn {
        cli: String,
        source: std::io::Error,
    },

    #[error("wp-cli exited with code {code:?}: {output}")]
    Failed { code: Option<i32>, output: String },
}

/// Seam for invoking the companion WP-CLI tool.
#[async_trait]
pub trait CliInvoker: Send + Sync {
    /// Run one subcommand and return its combined stdout/stderr output.
    async fn invoke(&self, args: &[String]) -> Result<String, InvokeError>;
}

/// The real WP-CLI binary.
pub struct WpCli {
    cli_path: PathBuf,
    wp_path: PathBuf,
}

impl WpCli {
    pub fn new(config: &Config) -> Self {
        Self {
            cli_path: config.cli_path.clone(),
            wp_path: config.wp_path.clone(),
        }
    }
}

#[async_trait]
impl CliInvoker for WpCli {
    async fn invoke(&self, args: &[String]) -> Result<String, InvokeError> {
        let output = tokio::process::Command::new(&self.cli_path)
            .args(args)
            .arg("--allow-root")
            .arg("--quiet")
            .arg(format!("--path={}", self.wp_path.display()))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| InvokeError::Spawn {
                cli: self.cli_path.display().to_string(),
                source,
            })?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        let text = String::from_utf8_lossy(&combined).into_owned();

        if !output.status.success() {
            return Err(InvokeError::Failed {
                code: output.status.code(),
                output: text,
            });
        }

        Ok(text)
    }
}
