use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use relay_es::{SharedEsBuffer, VariantKey};
use relay_segmenter::Segmenter;

/// Identifies one active segmenter: a codec variant in a given container
/// mode. A session lazily spawns one per distinct combination a client
/// actually requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorKey {
    pub variant: VariantKey,
    pub fmp4: bool,
}

impl ProcessorKey {
    pub fn new(variant: VariantKey, fmp4: bool) -> Self {
        Self { variant, fmp4 }
    }
}

/// One live channel: its ES buffer, the format-specific segmenters reading
/// from it, and enough wall-clock bookkeeping to decide when to tear the
/// whole thing down. `Segmenter` is not internally synchronized (see its
/// own docs), so each is owned behind a `parking_lot::Mutex` here rather
/// than inside the segmenter itself.
pub struct ChannelSession {
    channel_id: String,
    buffer: Arc<SharedEsBuffer>,
    processors: RwLock<HashMap<ProcessorKey, Arc<Mutex<Segmenter>>>>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
}

impl ChannelSession {
    pub fn new(channel_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            channel_id: channel_id.into(),
            buffer: Arc::new(SharedEsBuffer::new()),
            processors: RwLock::new(HashMap::new()),
            created_at: now,
            last_activity: RwLock::new(now),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn buffer(&self) -> &Arc<SharedEsBuffer> {
        &self.buffer
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Records client activity, resetting the idle clock. Called on every
    /// client playlist/segment/manifest request.
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    pub fn is_idle(&self, grace: Duration) -> bool {
        self.idle_for() >= grace
    }

    /// Returns the segmenter for `key`, creating it via `create` on first
    /// request so a format/variant combination no client ever asked for
    /// never gets built.
    pub fn get_or_create_processor(
        &self,
        key: ProcessorKey,
        create: impl FnOnce() -> Segmenter,
    ) -> Arc<Mutex<Segmenter>> {
        if let Some(processor) = self.processors.read().get(&key) {
            return processor.clone();
        }
        self.processors
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(create())))
            .clone()
    }

    pub fn get_processor(&self, key: ProcessorKey) -> Option<Arc<Mutex<Segmenter>>> {
        self.processors.read().get(&key).cloned()
    }

    pub fn processor_count(&self) -> usize {
        self.processors.read().len()
    }

    /// Closes the buffer so in-flight writes/reads stop, matching the
    /// co-terminal lifecycle (buffers never outlive their session).
    pub fn shutdown(&self) {
        self.buffer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_es::{AudioCodec, VideoCodec};
    use relay_segmenter::SegmenterConfig;
    use ts::pmt::StreamType;

    fn key() -> ProcessorKey {
        ProcessorKey::new(VariantKey::new(VideoCodec::H264, AudioCodec::Aac), false)
    }

    #[test]
    fn test_get_or_create_processor_reuses_existing() {
        let session = ChannelSession::new("chan1");
        let config = SegmenterConfig::new(Duration::from_secs(6), 5, false);
        let built = std::sync::atomic::AtomicUsize::new(0);

        let first = session.get_or_create_processor(key(), || {
            built.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Segmenter::new_ts(config, 90_000, StreamType::H264, Some(StreamType::Aac))
        });
        let second = session.get_or_create_processor(key(), || {
            built.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Segmenter::new_ts(config, 90_000, StreamType::H264, Some(StreamType::Aac))
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(session.processor_count(), 1);
    }

    #[test]
    fn test_touch_resets_idle_clock() {
        let session = ChannelSession::new("chan1");
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.idle_for() >= Duration::from_millis(20));
        session.touch();
        assert!(session.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn test_is_idle_past_grace() {
        let session = ChannelSession::new("chan1");
        assert!(!session.is_idle(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.is_idle(Duration::from_millis(10)));
    }
}
