//! Offline-rendered fallback slate: a looped MPEG-TS clip rendered once at
//! startup and served verbatim while a session's upstream is failing.
//!
//! Grounded on `process_utils::tokio_command` (spawning an external encoder
//! the way `platforms::extractor::streamlink_extractor` spawns `streamlink`)
//! for rendering, and on `relay_breaker::CircuitBreaker`'s lazily-observed
//! state-transition shape for the fallback controller.

mod controller;
mod error;
mod render;

use bytes::Bytes;
use tokio::sync::Mutex;

pub use controller::{ErrorKind, FallbackConfig, FallbackController, FallbackState};
pub use error::SlateError;
pub use render::{render_slate, SlateConfig};

/// Process-wide cache of the rendered slate bytes: the one piece of global
/// state in the relay. Lazily rendered on first use, explicitly clearable
/// so a shutdown can drop the cached clip without tearing down sessions.
pub struct SlateStore {
    slate: Mutex<Option<Bytes>>,
}

impl Default for SlateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlateStore {
    pub fn new() -> Self {
        Self {
            slate: Mutex::new(None),
        }
    }

    pub async fn get_or_render(&self, cfg: &SlateConfig) -> Result<Bytes, SlateError> {
        let mut guard = self.slate.lock().await;
        if let Some(bytes) = guard.as_ref() {
            return Ok(bytes.clone());
        }
        let bytes = render_slate(cfg).await?;
        *guard = Some(bytes.clone());
        Ok(bytes)
    }

    pub async fn teardown(&self) {
        *self.slate.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_teardown_clears_cache() {
        let store = SlateStore::new();
        *store.slate.lock().await = Some(Bytes::from_static(b"ts-bytes"));
        store.teardown().await;
        assert!(store.slate.lock().await.is_none());
    }
}
