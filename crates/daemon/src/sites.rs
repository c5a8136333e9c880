// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Site discovery and the disable policy.
//!
//! Every discovery cycle asks the instance for its info, consults the
//! disable policy, and either enumerates the sites to poll or skips the
//! cycle (optionally backing off). The returned site list is shuffled so no
//! site is systematically favored by fetch ordering.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{info, warn};
use wpr_core::{Clock, InstanceInfo, Site};

use crate::wp::{CliInvoker, InvokeError};

/// Backoff added per consecutive skipped cycle.
const BACKOFF_STEP: Duration = Duration::from_secs(3 * 60);
/// A computed backoff beyond this resets the skip counter instead.
const BACKOFF_CAP: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("unable to decode companion output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("get-info returned no instance info")]
    EmptyInfo,
}

/// Outcome of consulting the disable policy for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableVerdict {
    Run,
    /// Skip this cycle, sleeping `backoff` first when non-zero.
    Skip { backoff: Duration },
}

/// Enumerates the sites to poll each cycle.
pub struct SiteSource<I, C> {
    invoker: Arc<I>,
    clock: C,
    disabled_loop_count: AtomicU32,
}

impl<I: CliInvoker, C: Clock> SiteSource<I, C> {
    pub fn new(invoker: Arc<I>, clock: C) -> Self {
        Self {
            invoker,
            clock,
            disabled_loop_count: AtomicU32::new(0),
        }
    }

    /// The sites to poll this cycle, randomly permuted. Empty when the
    /// instance has execution disabled (after any backoff sleep).
    pub async fn get_sites(&self) -> Result<Vec<Site>, DiscoveryError> {
        let info = self.instance_info().await?;

        match self.consult_disable_policy(info.disabled) {
            DisableVerdict::Run => {}
            DisableVerdict::Skip { backoff } => {
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                return Ok(Vec::new());
            }
        }

        let mut sites = if info.is_multisite() {
            self.multisite_sites().await?
        } else {
            vec![Site { url: info.siteurl }]
        };

        sites.shuffle(&mut rand::thread_rng());
        Ok(sites)
    }

    async fn instance_info(&self) -> Result<InstanceInfo, DiscoveryError> {
        let raw = self
            .invoker
            .invoke(&args(&["cron-control", "orchestrate", "get-info", "--format=json"]))
            .await?;
        let mut parsed: Vec<InstanceInfo> = serde_json::from_str(&raw)?;
        if parsed.is_empty() {
            return Err(DiscoveryError::EmptyInfo);
        }
        Ok(parsed.swap_remove(0))
    }

    async fn multisite_sites(&self) -> Result<Vec<Site>, DiscoveryError> {
        let raw = self
            .invoker
            .invoke(&args(&[
                "site",
                "list",
                "--fields=url",
                "--archived=false",
                "--deleted=false",
                "--spam=false",
                "--format=json",
            ]))
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Decide whether this cycle runs, per the instance's `disabled` value:
    /// `0` runs, `1` skips indefinitely, anything greater is a unix-second
    /// re-enable deadline that skips with an escalating backoff.
    ///
    /// The backoff counts this cycle: the first skipped cycle backs off one
    /// [`BACKOFF_STEP`], the next two, and so on. The count resets once
    /// `now + backoff` passes the deadline or the backoff would exceed
    /// [`BACKOFF_CAP`]; a reset cycle still sleeps its computed backoff, so
    /// the reset takes effect the following cycle.
    pub fn consult_disable_policy(&self, disabled: i64) -> DisableVerdict {
        match disabled {
            0 => {
                self.disabled_loop_count.store(0, Ordering::Relaxed);
                DisableVerdict::Run
            }
            1 => {
                info!("automatic execution disabled");
                self.disabled_loop_count.store(0, Ordering::Relaxed);
                DisableVerdict::Skip {
                    backoff: Duration::ZERO,
                }
            }
            deadline => {
                let count = self.disabled_loop_count.load(Ordering::Relaxed) + 1;
                let backoff = BACKOFF_STEP * count;
                let resumes = self.clock.epoch_secs() + backoff.as_secs() as i64;

                if resumes > deadline || backoff > BACKOFF_CAP {
                    self.disabled_loop_count.store(0, Ordering::Relaxed);
                } else {
                    self.disabled_loop_count.store(count, Ordering::Relaxed);
                }

                warn!(
                    deadline,
                    backoff_secs = backoff.as_secs(),
                    "automatic execution disabled, backing off"
                );
                DisableVerdict::Skip { backoff }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn skip_count(&self) -> u32 {
        self.disabled_loop_count.load(Ordering::Relaxed)
    }
}

/// Owned argument vector for an invocation.
pub(crate) fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
#[path = "sites_tests.rs"]
mod tests;
