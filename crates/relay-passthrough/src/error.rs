use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PassthroughError {
    #[error("segment not found")]
    SegmentNotFound,
    #[error("upstream error: {0}")]
    Upstream(String),
}
