use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::WorkerError;
use crate::message::ProbeResponsePayload;

/// Routes a synchronous probe request/response pair multiplexed on the
/// worker stream. Generalizes `SingleFlight`'s inflight map to a
/// single-entry rendezvous keyed by stream URL: one waiter registers, the
/// receive loop resolves it by the same key when the matching
/// `ProbeResponse` arrives, and a timeout cleans up an abandoned entry.
pub struct ProbePendingMap {
    pending: Mutex<HashMap<String, oneshot::Sender<ProbeResponsePayload>>>,
}

impl ProbePendingMap {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter for `request_id` and blocks until a matching
    /// `resolve` call or `timeout` elapses, whichever comes first. On
    /// timeout the pending entry is removed so a late response is dropped
    /// rather than delivered to a waiter that already gave up.
    pub async fn await_response(
        &self,
        request_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<ProbeResponsePayload, WorkerError> {
        let request_id = request_id.into();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(WorkerError::ProbeDropped(request_id)),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(WorkerError::ProbeTimeout(request_id))
            }
        }
    }

    /// Delivers a response to its waiter, if one is still registered.
    /// Returns `true` if a waiter was found (the response was routed).
    pub fn resolve(&self, response: ProbeResponsePayload) -> bool {
        if let Some(tx) = self.pending.lock().remove(&response.url) {
            return tx.send(response).is_ok();
        }
        false
    }
}

impl Default for ProbePendingMap {
    fn default() -> Self {
        Self::new()
    }
}
