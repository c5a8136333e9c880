// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles shared across the daemon's unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::wp::{CliInvoker, InvokeError};

/// A [`CliInvoker`] that serves canned outputs and records every call.
///
/// Responses are keyed by a substring of the space-joined argument list.
/// The last queued response for a key is sticky, so a single `respond` call
/// covers any number of identical invocations; queueing several responses
/// replays them in order.
#[derive(Default)]
pub(crate) struct ScriptedInvoker {
    calls: Mutex<Vec<Vec<String>>>,
    responses: Mutex<Vec<(String, VecDeque<String>)>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: &str, output: &str) {
        let mut responses = self.responses.lock();
        if let Some((_, queue)) = responses.iter_mut().find(|(k, _)| k == key) {
            queue.push_back(output.to_string());
        } else {
            responses.push((key.to_string(), VecDeque::from([output.to_string()])));
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Calls whose joined argument list contains `key`.
    pub fn calls_matching(&self, key: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|args| args.join(" "))
            .filter(|joined| joined.contains(key))
            .collect()
    }
}

#[async_trait]
impl CliInvoker for ScriptedInvoker {
    async fn invoke(&self, args: &[String]) -> Result<String, InvokeError> {
        let joined = args.join(" ");
        self.calls.lock().push(args.to_vec());

        let mut responses = self.responses.lock();
        for (key, queue) in responses.iter_mut() {
            if joined.contains(key.as_str()) {
                let output = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(output) = output {
                    return Ok(output);
                }
            }
        }

        Err(InvokeError::Failed {
            code: Some(1),
            output: format!("unscripted invocation: {joined}"),
        })
    }
}
