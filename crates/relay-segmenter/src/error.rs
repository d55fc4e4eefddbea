#[derive(Debug, Clone, thiserror::Error)]
pub enum SegmenterError {
    #[error("segment {0} is not resident in the window")]
    SegmentNotFound(u64),
    #[error("no segments ready yet")]
    NotReady,
    #[error("requested before the second segment became ready")]
    TooEarly,
}
