// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-run workers.
//!
//! Each worker dispatches one event at a time via `orchestrate run` and then
//! pauses; the per-worker pause is the pipeline's only global rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};
use wpr_core::Event;

use super::SharedReceiver;
use crate::wp::CliInvoker;

/// Pause after each dispatched event.
const INTER_EVENT_PAUSE: Duration = Duration::from_secs(10);

/// Argument vector for dispatching one event.
pub(crate) fn run_args(event: &Event, network: Option<u64>) -> Vec<String> {
    let mut args = vec![
        "cron-control".to_string(),
        "orchestrate".to_string(),
        "run".to_string(),
        format!("--timestamp={}", event.timestamp),
        format!("--action={}", event.action),
        format!("--instance={}", event.instance),
        format!("--url={}", event.url),
    ];
    if let Some(id) = network {
        args.push(format!("--network={id}"));
    }
    args
}

/// Spawn the long-lived runner pool. Workers exit when the event channel is
/// closed and drained.
pub(crate) fn spawn_runners<I: CliInvoker + 'static>(
    workers: usize,
    invoker: Arc<I>,
    events: SharedReceiver<Event>,
    network: Option<u64>,
) -> JoinSet<()> {
    let mut set = JoinSet::new();
    for worker in 1..=workers {
        let invoker = Arc::clone(&invoker);
        let events = Arc::clone(&events);
        set.spawn(async move {
            run_worker(worker, invoker, events, network).await;
        });
    }
    set
}

async fn run_worker<I: CliInvoker>(
    worker: usize,
    invoker: Arc<I>,
    events: SharedReceiver<Event>,
    network: Option<u64>,
) {
    loop {
        let event = { events.lock().await.recv().await };
        let Some(event) = event else { break };

        // Output and exit status are the companion tool's concern.
        if let Err(e) = invoker.invoke(&run_args(&event, network)).await {
            warn!(worker, error = %e, "event dispatch reported failure");
        }

        info!(
            worker,
            "finished job {}|{}|{} for {}",
            event.timestamp,
            event.action,
            event.instance,
            event.url
        );

        tokio::time::sleep(INTER_EVENT_PAUSE).await;
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
