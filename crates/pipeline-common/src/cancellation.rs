//! Cooperative cancellation signal shared across pipeline stages.

pub use tokio_util::sync::CancellationToken;
