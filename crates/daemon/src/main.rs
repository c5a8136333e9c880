// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wprd: the wp-runner daemon binary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use wpr_core::SystemClock;
use wpr_daemon::config::{Config, LogDest, STDOUT_SENTINEL};
use wpr_daemon::pipeline::Supervisor;
use wpr_daemon::remote::{RemoteServer, LISTEN_ADDR};
use wpr_daemon::wp::WpCli;
use wpr_daemon::logger;

/// Bad paths or usage.
const EXIT_USAGE: u8 = 3;
/// Fatal I/O during setup.
const EXIT_FATAL: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "wprd", about = "WP-CLI cron orchestrator and remote session server")]
struct Args {
    /// Path to WP-CLI binary
    #[arg(long = "cli", default_value = "/usr/local/bin/wp")]
    cli: PathBuf,

    /// Path to WordPress installation
    #[arg(long = "wp", default_value = "/var/www/html")]
    wp: PathBuf,

    /// Number of workers to retrieve events
    #[arg(long = "workers-get", default_value_t = 3)]
    workers_get: usize,

    /// Number of workers to run events
    #[arg(long = "workers-run", default_value_t = 5)]
    workers_run: usize,

    /// Log path, or os.Stdout to log to standard output
    #[arg(long = "log", default_value = STDOUT_SENTINEL)]
    log: String,

    /// Network id appended to event dispatches
    #[arg(long = "network")]
    network: Option<u64>,

    /// Shared token required from remote session clients
    #[arg(long = "token", env = "WPR_REMOTE_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match resolve_config(args) {
        Ok(config) => Arc::new(config),
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let _guard = match logger::init(&config.log_dest) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match &config.token {
        Some(token) => {
            let listener = match tokio::net::TcpListener::bind(LISTEN_ADDR).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(addr = LISTEN_ADDR, error = %e, "unable to bind session port");
                    return ExitCode::from(EXIT_FATAL);
                }
            };
            info!(addr = LISTEN_ADDR, "remote session server listening");
            let server = RemoteServer::new(Arc::clone(&config), token.clone());
            tokio::spawn(server.run(listener));
        }
        None => info!("no remote token configured, remote sessions disabled"),
    }

    let invoker = Arc::new(WpCli::new(&config));
    let supervisor = Supervisor::new(Arc::clone(&config), invoker, SystemClock);
    match supervisor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "supervisor failed");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn resolve_config(args: Args) -> Result<Config, String> {
    let cli_path = validate_path(&args.cli)?;
    let wp_path = validate_path(&args.wp)?;
    let log_dest = LogDest::parse(&args.log)
        .map_err(|e| format!("unusable log destination {}: {e}", args.log))?;

    Ok(Config {
        cli_path,
        wp_path,
        workers_get: args.workers_get,
        workers_run: args.workers_run,
        log_dest,
        network: args.network,
        token: args.token,
    })
}

/// Paths must be non-trivial, absolute, and present on disk before startup.
fn validate_path(path: &Path) -> Result<PathBuf, String> {
    if path.as_os_str().len() < 2 {
        return Err(format!("path too short: {}", path.display()));
    }
    let absolute =
        std::path::absolute(path).map_err(|e| format!("{}: {e}", path.display()))?;
    if !absolute.exists() {
        return Err(format!("no such path: {}", absolute.display()));
    }
    Ok(absolute)
}
