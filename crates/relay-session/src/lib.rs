//! Channel session lifecycle sitting above the elementary-stream buffer:
//! one [`ChannelSession`] per live channel, owning its
//! `relay_es::SharedEsBuffer` and the format-specific `relay_segmenter`
//! instances clients have actually requested, reaped by
//! [`SessionManager`] after an idle grace period.
//!
//! Grounded on `relay_breaker::CircuitBreakerRegistry`'s lazy-create
//! registry with `retain`-based idle cleanup.

mod manager;
mod session;

pub use manager::SessionManager;
pub use session::{ChannelSession, ProcessorKey};
