use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CollapseError {
    #[error("playlist request failed: {0}")]
    PlaylistRequest(String),
    #[error("playlist parse failed: {0}")]
    PlaylistParse(String),
    #[error("segment request failed: {0}")]
    SegmentRequest(String),
    #[error("too many consecutive failures")]
    TooManyFailures,
}
