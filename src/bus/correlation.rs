//! Process-local correlation table for pending responses.
//!
//! Every correlated send is keyed by its message id. The entry owns its
//! deadline timer, and removal from the map is the guard that makes
//! resolution, rejection, and expiry mutually exclusive: whichever path
//! removes the entry first is the only one that completes the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::Payload;

struct Pending {
    tx: oneshot::Sender<Result<Payload>>,
    timer: JoinHandle<()>,
}

/// Map from message id to a pending continuation plus its deadline timer.
#[derive(Clone, Default)]
pub struct CorrelationTable {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending wait for `id` and arm its deadline timer. The
    /// returned receiver completes when the entry is removed by exactly one
    /// of resolve, reject, or expiry.
    pub fn insert(&self, id: &str, timeout_ms: u64) -> oneshot::Receiver<Result<Payload>> {
        let (tx, rx) = oneshot::channel();

        let table = self.clone();
        let timer_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            table.expire(&timer_id, timeout_ms);
        });

        let mut pending = self.lock();
        if let Some(stale) = pending.insert(id.to_string(), Pending { tx, timer }) {
            // A reused message id orphans the earlier wait; fail it rather
            // than leave its caller hanging.
            tracing::warn!(id = %id, "Duplicate correlation id, dropping earlier wait");
            stale.timer.abort();
            let _ = stale.tx.send(Err(Error::Handler(format!(
                "correlation id '{id}' was reused"
            ))));
        }
        rx
    }

    /// Complete the wait for `id` with a payload. Returns false if no entry
    /// exists (already resolved, already timed out, or unknown id).
    pub fn resolve(&self, id: &str, payload: Payload) -> bool {
        match self.take(id) {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.tx.send(Ok(payload));
                true
            }
            None => {
                tracing::debug!(id = %id, "Response for unknown or settled correlation id, discarding");
                false
            }
        }
    }

    /// Fail the wait for `id`. Returns false if no entry exists.
    pub fn reject(&self, id: &str, error: Error) -> bool {
        match self.take(id) {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.tx.send(Err(error));
                true
            }
            None => {
                tracing::debug!(id = %id, "Rejection for unknown or settled correlation id, discarding");
                false
            }
        }
    }

    /// Deadline path: reject with a timeout error if the entry still exists.
    /// A race with a just-arrived response makes this a no-op.
    fn expire(&self, id: &str, timeout_ms: u64) {
        if let Some(entry) = self.take(id) {
            tracing::debug!(id = %id, timeout_ms, "Correlated wait timed out");
            let _ = entry.tx.send(Err(Error::Timeout {
                id: id.to_string(),
                timeout_ms,
            }));
        }
    }

    /// Drop the wait for `id` without completing it. Used when the send
    /// itself failed before anything could answer; the caller already holds
    /// the error.
    pub(crate) fn forget(&self, id: &str) {
        if let Some(entry) = self.take(id) {
            entry.timer.abort();
        }
    }

    /// Number of waits still pending.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, id: &str) -> Option<Pending> {
        self.lock().remove(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        // Entries are plain data; a poisoned lock only means another thread
        // panicked mid-operation, so keep serving the map.
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
