//! Worker RPC: the bidirectional message stream between the relay and one
//! transcoder worker process.
//!
//! `relay_scheduler` already owns admission (which worker, which job
//! type); this crate owns the wire-level sum type those decisions are
//! carried over, and the synchronous probe request/response rendezvous
//! multiplexed on the same stream. Grounded on `pipeline_common`'s
//! `ChannelPipeline` (each direction of the stream is a plain
//! `tokio::sync::mpsc` half) and `relay_passthrough::single_flight`'s
//! pending-map shape, narrowed from broadcast-to-many to one waiter per
//! probe.

mod error;
mod message;
mod pending;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use error::WorkerError;
pub use message::{
    Container, ProbeInfo, ProbeRequestPayload, ProbeResponsePayload, SampleBatch, StartPayload,
    WorkerMessage, WorkerStats,
};
pub use pending::ProbePendingMap;

/// One worker's half of the bidirectional stream, as seen by the relay.
///
/// `outbound` carries `Start`/`Stop`/`ProbeRequest` to the worker. Inbound
/// messages (`Samples`, `Stats`, `InputComplete`, `ProbeResponse`) arrive
/// on a separate `mpsc::Receiver<WorkerMessage>` that the caller pumps
/// through [`WorkerConnection::route_inbound`], since only the connection
/// knows how to resolve a pending probe.
pub struct WorkerConnection {
    worker_id: String,
    outbound: mpsc::Sender<WorkerMessage>,
    pending_probes: Arc<ProbePendingMap>,
}

impl WorkerConnection {
    pub fn new(worker_id: impl Into<String>, outbound: mpsc::Sender<WorkerMessage>) -> Self {
        Self {
            worker_id: worker_id.into(),
            outbound,
            pending_probes: Arc::new(ProbePendingMap::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn send(&self, message: WorkerMessage) -> Result<(), WorkerError> {
        self.outbound.send(message).await.map_err(|_| WorkerError::Disconnected)
    }

    pub async fn start(&self, payload: StartPayload) -> Result<(), WorkerError> {
        debug!(worker_id = %self.worker_id, job_id = %payload.job_id, "sending start");
        self.send(WorkerMessage::Start(payload)).await
    }

    pub async fn stop(&self, job_id: impl Into<String>) -> Result<(), WorkerError> {
        let job_id = job_id.into();
        debug!(worker_id = %self.worker_id, %job_id, "sending stop");
        self.send(WorkerMessage::Stop { job_id }).await
    }

    /// Sends a probe request and waits up to `timeout` for the matching
    /// `ProbeResponse`, routed by `url`.
    pub async fn probe(&self, url: impl Into<String>, timeout: Duration) -> Result<ProbeInfo, WorkerError> {
        let url = url.into();
        self.send(WorkerMessage::ProbeRequest(ProbeRequestPayload { url: url.clone() }))
            .await?;
        let response = self.pending_probes.await_response(url, timeout).await?;
        response.outcome.map_err(|message| WorkerError::ProbeFailed(response.url, message))
    }

    /// Feeds one inbound message through the connection. Resolves and
    /// consumes `ProbeResponse`s; everything else is handed back for the
    /// caller to forward to the job/session it belongs to.
    pub fn route_inbound(&self, message: WorkerMessage) -> Option<WorkerMessage> {
        match message {
            WorkerMessage::ProbeResponse(response) => {
                if !self.pending_probes.resolve(response) {
                    warn!(worker_id = %self.worker_id, "probe response had no waiter, dropped");
                }
                None
            }
            other => Some(other),
        }
    }
}
