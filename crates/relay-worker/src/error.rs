#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("worker stream closed")]
    Disconnected,
    #[error("probe {0} timed out")]
    ProbeTimeout(String),
    #[error("probe {0} was dropped without a response")]
    ProbeDropped(String),
    #[error("probe {0} failed: {1}")]
    ProbeFailed(String, String),
}
