use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::session::ChannelSession;

/// Registry of live channel sessions, keyed by channel identifier.
/// Sessions are created lazily on first client request and reaped by
/// [`SessionManager::cleanup_idle`] once they have gone a full grace
/// period with no client activity. Grounded on
/// `relay_breaker::CircuitBreakerRegistry`'s lazy-create-plus-retain-based
/// cleanup shape.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ChannelSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<ChannelSession>> {
        self.sessions.read().get(channel_id).cloned()
    }

    /// Returns the session for `channel_id`, creating it on first call,
    /// and touches its activity clock either way.
    pub fn get_or_create(&self, channel_id: &str) -> Arc<ChannelSession> {
        if let Some(session) = self.get(channel_id) {
            session.touch();
            return session;
        }
        let session = self
            .sessions
            .write()
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                info!(channel_id, "channel session created");
                Arc::new(ChannelSession::new(channel_id))
            })
            .clone();
        session.touch();
        session
    }

    pub fn remove(&self, channel_id: &str) -> Option<Arc<ChannelSession>> {
        let removed = self.sessions.write().remove(channel_id);
        if let Some(session) = &removed {
            session.shutdown();
            info!(channel_id, "channel session removed");
        }
        removed
    }

    /// Tears down every session idle for at least `grace`, shutting down
    /// its buffer so any processors still holding a clone stop producing.
    pub fn cleanup_idle(&self, grace: Duration) -> Vec<String> {
        let idle: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| session.is_idle(grace))
            .map(|(id, _)| id.clone())
            .collect();

        for channel_id in &idle {
            if let Some(session) = self.sessions.write().remove(channel_id) {
                session.shutdown();
                debug!(channel_id, "idle channel session reaped");
            }
        }
        idle
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_same_session() {
        let manager = SessionManager::new();
        let a = manager.get_or_create("chan1");
        let b = manager.get_or_create("chan1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_cleanup_idle_reaps_only_past_grace() {
        let manager = SessionManager::new();
        manager.get_or_create("stale");
        std::thread::sleep(Duration::from_millis(20));
        manager.get_or_create("fresh");

        let reaped = manager.cleanup_idle(Duration::from_millis(10));
        assert_eq!(reaped, vec!["stale".to_string()]);
        assert!(manager.get("stale").is_none());
        assert!(manager.get("fresh").is_some());
    }

    #[test]
    fn test_remove_shuts_down_buffer() {
        let manager = SessionManager::new();
        let session = manager.get_or_create("chan1");
        manager.remove("chan1");
        session.buffer().write_video_to_source(0, 0, bytes::Bytes::from_static(b"x"), true);
        assert!(session.buffer().read_from(
            relay_es::VariantKey::new(relay_es::VideoCodec::H264, relay_es::AudioCodec::Aac),
            relay_es::TrackKind::Video,
            0,
            10
        ).is_empty());
    }
}
