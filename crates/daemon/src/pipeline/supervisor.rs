// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires the pipeline together and owns the process lifecycle: the periodic
//! discovery tick, the runner pool, the heartbeat, and signal-driven drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, Sender};
use tracing::{debug, info, warn};
use wpr_core::{Clock, Event};

use super::{fetch, run, shared};
use crate::config::Config;
use crate::sites::SiteSource;
use crate::wp::CliInvoker;

/// Cycle length of the site-discovery loop, and its sleep on failure.
const DISCOVERY_PERIOD: Duration = Duration::from_secs(60);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);
/// How long runners get to drain the event queue after a shutdown signal.
const DRAIN_GRACE: Duration = Duration::from_secs(60);
/// Event queue depth. Kept minimal so fetchers feel runner backpressure.
const EVENT_QUEUE_DEPTH: usize = 1;

/// Owns the event pipeline's tasks for the life of the process.
pub struct Supervisor<I, C> {
    config: Arc<Config>,
    invoker: Arc<I>,
    sites: Arc<SiteSource<I, C>>,
}

impl<I: CliInvoker + 'static, C: Clock + 'static> Supervisor<I, C> {
    pub fn new(config: Arc<Config>, invoker: Arc<I>, clock: C) -> Self {
        let sites = Arc::new(SiteSource::new(Arc::clone(&invoker), clock));
        Self {
            config,
            invoker,
            sites,
        }
    }

    /// Run until an interrupt or terminate signal arrives, then close the
    /// event channel and give runners a grace period to drain.
    pub async fn run(self) -> std::io::Result<()> {
        info!("starting");

        let (event_tx, event_rx) = mpsc::channel::<Event>(EVENT_QUEUE_DEPTH);

        let mut runners = run::spawn_runners(
            self.config.workers_run,
            Arc::clone(&self.invoker),
            shared(event_rx),
            self.config.network,
        );

        let discovery = tokio::spawn(discovery_loop(
            Arc::clone(&self.sites),
            Arc::clone(&self.invoker),
            self.config.workers_get,
            event_tx,
        ));
        let heartbeat = tokio::spawn(heartbeat_loop());

        wait_for_shutdown().await?;
        info!("shutdown signal received, draining event queue");

        // Aborting discovery drops the event sender (and any in-cycle
        // fetchers holding clones), which closes the channel for runners.
        discovery.abort();
        heartbeat.abort();

        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while runners.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("drain grace period expired, abandoning in-flight events");
            runners.abort_all();
        }

        info!("stopping");
        Ok(())
    }
}

async fn discovery_loop<I: CliInvoker + 'static, C: Clock>(
    sites: Arc<SiteSource<I, C>>,
    invoker: Arc<I>,
    workers_get: usize,
    events: Sender<Event>,
) {
    loop {
        run_cycle(&sites, &invoker, workers_get, &events).await;
        tokio::time::sleep(DISCOVERY_PERIOD).await;
    }
}

/// One discovery cycle: enumerate sites, fan them out to a fresh fetcher
/// pool, and wait for the pool to drain the cycle's site channel.
async fn run_cycle<I: CliInvoker + 'static, C: Clock>(
    sites: &Arc<SiteSource<I, C>>,
    invoker: &Arc<I>,
    workers_get: usize,
    events: &Sender<Event>,
) {
    let list = match sites.get_sites().await {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "site discovery failed");
            return;
        }
    };
    if list.is_empty() {
        return;
    }

    debug!(count = list.len(), "dispatching sites to fetchers");

    let (site_tx, site_rx) = mpsc::channel(list.len());
    let mut fetchers = fetch::spawn_fetchers(
        workers_get,
        Arc::clone(invoker),
        shared(site_rx),
        events.clone(),
    );

    for site in list {
        if site_tx.send(site).await.is_err() {
            break;
        }
    }
    drop(site_tx);

    while fetchers.join_next().await.is_some() {}
}

async fn heartbeat_loop() {
    loop {
        tokio::time::sleep(HEARTBEAT_PERIOD).await;
        info!("<heartbeat>");
    }
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => info!("interrupt received"),
        _ = terminate.recv() => info!("terminate received"),
    }
    Ok(())
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
