// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-fetch workers: one `list-due-batch` invocation per site.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use wpr_core::{Event, Site};

use super::SharedReceiver;
use crate::sites::args;
use crate::wp::{CliInvoker, InvokeError};

/// Pause after each processed site, errors included.
const INTER_SITE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub(crate) enum FetchError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("unable to decode due-event batch: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Fetch the due-event batch for one site, stamping each event with the
/// site's url.
async fn fetch_site_events<I: CliInvoker>(
    invoker: &I,
    site: &str,
) -> Result<Vec<Event>, FetchError> {
    let raw = invoker
        .invoke(&args(&[
            "cron-control",
            "orchestrate",
            "list-due-batch",
            &format!("--url={site}"),
            "--format=json",
        ]))
        .await?;
    let mut events: Vec<Event> = serde_json::from_str(&raw)?;
    for event in &mut events {
        event.url = site.to_string();
    }
    Ok(events)
}

/// Spawn the per-cycle fetcher pool. Workers exit once the site channel
/// drains; the returned set aborts them all if dropped early.
pub(crate) fn spawn_fetchers<I: CliInvoker + 'static>(
    workers: usize,
    invoker: Arc<I>,
    sites: SharedReceiver<Site>,
    events: Sender<Event>,
) -> JoinSet<()> {
    let mut set = JoinSet::new();
    for worker in 1..=workers {
        let invoker = Arc::clone(&invoker);
        let sites = Arc::clone(&sites);
        let events = events.clone();
        set.spawn(async move {
            fetch_worker(worker, invoker, sites, events).await;
        });
    }
    set
}

async fn fetch_worker<I: CliInvoker>(
    worker: usize,
    invoker: Arc<I>,
    sites: SharedReceiver<Site>,
    events: Sender<Event>,
) {
    loop {
        let site = { sites.lock().await.recv().await };
        let Some(site) = site else { break };

        debug!(worker, site = %site.url, "fetching due events");

        match fetch_site_events(invoker.as_ref(), &site.url).await {
            Ok(batch) => {
                for event in batch {
                    if events.send(event).await.is_err() {
                        // Runner side is gone; the daemon is shutting down.
                        return;
                    }
                }
            }
            Err(e) => warn!(worker, site = %site.url, error = %e, "due-event fetch failed"),
        }

        tokio::time::sleep(INTER_SITE_PAUSE).await;
    }
}

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;
