// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event pipeline: site discovery feeding a per-cycle fetcher pool,
//! feeding a long-lived runner pool over a bounded event channel.

mod fetch;
mod run;
mod supervisor;

pub use supervisor::Supervisor;

use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::sync::Mutex;

/// A receiver shared by a pool of workers.
///
/// tokio's mpsc is single-consumer; the pools take turns on the receiver
/// instead, which preserves the channel's bounded backpressure.
pub(crate) type SharedReceiver<T> = Arc<Mutex<Receiver<T>>>;

pub(crate) fn shared<T>(rx: Receiver<T>) -> SharedReceiver<T> {
    Arc::new(Mutex::new(rx))
}
