use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EsError {
    /// A derived variant (or the `copy/copy` passthrough key) was requested
    /// before any source variant has been established.
    #[error("no source variant established yet")]
    NoSource,
}
