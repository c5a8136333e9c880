// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::ScriptedInvoker;
use crate::pipeline::shared;
use tokio::sync::mpsc;

async fn drain_pool(mut set: JoinSet<()>) {
    while set.join_next().await.is_some() {}
}

#[tokio::test(start_paused = true)]
async fn stamps_events_with_their_site_url() {
    let invoker = Arc::new(ScriptedInvoker::new());
    invoker.respond(
        "list-due-batch --url=https://a.example",
        r#"[{"timestamp":1700000000,"action":"x","instance":"i1"},
           {"timestamp":1700000060,"action":"y","instance":"i2"}]"#,
    );

    let (site_tx, site_rx) = mpsc::channel(1);
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let pool = spawn_fetchers(1, Arc::clone(&invoker), shared(site_rx), event_tx);

    site_tx
        .send(Site { url: "https://a.example".to_string() })
        .await
        .unwrap();
    drop(site_tx);
    drain_pool(pool).await;

    let first = event_rx.recv().await.unwrap();
    assert_eq!(first.url, "https://a.example");
    assert_eq!(first.action, "x");
    let second = event_rx.recv().await.unwrap();
    assert_eq!(second.url, "https://a.example");
    assert_eq!(second.action, "y");
    assert!(event_rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_moves_on_to_the_next_site() {
    let invoker = Arc::new(ScriptedInvoker::new());
    // a.example is unscripted and fails; b.example succeeds
    invoker.respond(
        "list-due-batch --url=https://b.example",
        r#"[{"timestamp":1700000000,"action":"z","instance":"i1"}]"#,
    );

    let (site_tx, site_rx) = mpsc::channel(2);
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let pool = spawn_fetchers(1, Arc::clone(&invoker), shared(site_rx), event_tx);

    for url in ["https://a.example", "https://b.example"] {
        site_tx.send(Site { url: url.to_string() }).await.unwrap();
    }
    drop(site_tx);
    drain_pool(pool).await;

    let event = event_rx.recv().await.unwrap();
    assert_eq!(event.url, "https://b.example");
    assert!(event_rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn garbage_batch_output_is_swallowed() {
    let invoker = Arc::new(ScriptedInvoker::new());
    invoker.respond("list-due-batch", "PHP Fatal error");

    let (site_tx, site_rx) = mpsc::channel(1);
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let pool = spawn_fetchers(1, Arc::clone(&invoker), shared(site_rx), event_tx);

    site_tx
        .send(Site { url: "https://a.example".to_string() })
        .await
        .unwrap();
    drop(site_tx);
    drain_pool(pool).await;

    assert!(event_rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn workers_split_the_site_channel() {
    let invoker = Arc::new(ScriptedInvoker::new());
    invoker.respond("list-due-batch", "[]");

    let (site_tx, site_rx) = mpsc::channel(8);
    let (event_tx, _event_rx) = mpsc::channel(16);
    let pool = spawn_fetchers(3, Arc::clone(&invoker), shared(site_rx), event_tx);

    for i in 0..8 {
        site_tx
            .send(Site { url: format!("https://s{i}.example") })
            .await
            .unwrap();
    }
    drop(site_tx);
    drain_pool(pool).await;

    // Every site fetched exactly once across the pool
    assert_eq!(invoker.calls_matching("list-due-batch").len(), 8);
}
