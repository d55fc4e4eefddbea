use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::EsError;
use crate::sample::{AudioCodec, EsSample, TrackKind, VariantKey, VideoCodec};
use crate::variant::EsVariant;

/// What a caller of [`SharedEsBuffer::get_or_create_variant`] wants back.
pub enum VariantRequest {
    /// The source variant itself, re-muxed but not transcoded. Waits on
    /// the source-ready latch if the source has not appeared yet.
    Copy,
    /// A specific transcoded codec variant.
    Transcode(VariantKey),
}

/// Owns the source ES variant (produced by ingest) plus any number of
/// derived variants (produced by a transcoder), keyed by codec pair.
///
/// Exactly one variant is the source. Mutation is guarded per-field with
/// `parking_lot` locks; individual tracks hold their own locks, so callers
/// must never hold a variant lock across a call that also needs the
/// buffer's `variants` lock.
pub struct SharedEsBuffer {
    source: RwLock<Option<Arc<EsVariant>>>,
    source_key: RwLock<Option<VariantKey>>,
    pending_video: RwLock<Option<VideoCodec>>,
    pending_audio: RwLock<Option<AudioCodec>>,
    variants: RwLock<HashMap<VariantKey, Arc<EsVariant>>>,
    ready_flag: AtomicBool,
    ready_notify: Notify,
    closed: AtomicBool,
}

impl SharedEsBuffer {
    pub fn new() -> Self {
        Self {
            source: RwLock::new(None),
            source_key: RwLock::new(None),
            pending_video: RwLock::new(None),
            pending_audio: RwLock::new(None),
            variants: RwLock::new(HashMap::new()),
            ready_flag: AtomicBool::new(false),
            ready_notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_source(&self) -> Arc<EsVariant> {
        if let Some(v) = self.source.read().clone() {
            return v;
        }
        let mut guard = self.source.write();
        if let Some(v) = guard.clone() {
            return v;
        }
        let variant = Arc::new(EsVariant::new(true));
        *guard = Some(variant.clone());
        drop(guard);
        self.ready_flag.store(true, Ordering::Release);
        self.ready_notify.notify_waiters();
        debug!("source ES variant created");
        variant
    }

    fn maybe_finalize_key(&self) {
        if self.source_key.read().is_some() {
            return;
        }
        let (Some(video), Some(audio)) = (*self.pending_video.read(), *self.pending_audio.read())
        else {
            return;
        };
        *self.source_key.write() = Some(VariantKey::new(video, audio));
    }

    pub fn set_video_codec(&self, codec: VideoCodec, init_data: Bytes) {
        let source = self.ensure_source();
        source.video.set_codec(format!("{codec:?}"), init_data);
        *self.pending_video.write() = Some(codec);
        self.maybe_finalize_key();
    }

    pub fn set_audio_codec(&self, codec: AudioCodec, init_data: Bytes) {
        let source = self.ensure_source();
        source.audio.set_codec(format!("{codec:?}"), init_data);
        *self.pending_audio.write() = Some(codec);
        self.maybe_finalize_key();
    }

    pub fn write_video_to_source(&self, pts: u64, dts: u64, data: Bytes, keyframe: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.ensure_source().write_video(pts, dts, data, keyframe);
    }

    pub fn write_audio_to_source(&self, pts: u64, data: Bytes) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.ensure_source().write_audio(pts, data);
    }

    /// Blocks until the source variant exists (i.e. at least one of
    /// `set_video_codec` / `set_audio_codec` has been called).
    pub async fn wait_source_ready(&self) {
        let notified = self.ready_notify.notified();
        if self.ready_flag.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    pub fn source_variant(&self) -> Option<Arc<EsVariant>> {
        self.source.read().clone()
    }

    pub fn source_key(&self) -> Option<VariantKey> {
        *self.source_key.read()
    }

    /// Whatever codecs have been classified so far, even if the pair isn't
    /// complete yet (e.g. a video-only source never gets an audio codec).
    pub fn pending_codecs(&self) -> (Option<VideoCodec>, Option<AudioCodec>) {
        (*self.pending_video.read(), *self.pending_audio.read())
    }

    /// Returns an existing variant, or (for `Transcode`) requests a new
    /// transcoder via `start_transcoder(source_key, target_key)` and
    /// registers the resulting empty variant so concurrent callers share
    /// it rather than starting duplicate transcoders.
    pub async fn get_or_create_variant(
        &self,
        request: VariantRequest,
        start_transcoder: impl FnOnce(VariantKey, VariantKey) + Send,
    ) -> Result<Arc<EsVariant>, EsError> {
        match request {
            VariantRequest::Copy => {
                self.wait_source_ready().await;
                Ok(self.source.read().clone().expect("source ready"))
            }
            VariantRequest::Transcode(key) => {
                if let Some(variant) = self.variants.read().get(&key) {
                    return Ok(variant.clone());
                }
                let source_key = self.source_key().ok_or(EsError::NoSource)?;
                if source_key == key {
                    return Ok(self.source.read().clone().expect("source ready"));
                }
                let variant = Arc::new(EsVariant::new(false));
                self.variants.write().insert(key, variant.clone());
                start_transcoder(source_key, key);
                Ok(variant)
            }
        }
    }

    fn variant_for(&self, key: VariantKey) -> Option<Arc<EsVariant>> {
        if self.source_key() == Some(key) {
            return self.source.read().clone();
        }
        self.variants.read().get(&key).cloned()
    }

    pub fn register_consumer(&self, key: VariantKey, id: impl Into<String>) {
        if let Some(variant) = self.variant_for(key) {
            variant.register_consumer(id);
        }
    }

    pub fn update_consumer_position(&self, key: VariantKey, id: &str, video_seq: u64, audio_seq: u64) {
        if let Some(variant) = self.variant_for(key) {
            variant.update_consumer_position(id, video_seq, audio_seq);
        }
    }

    pub fn unregister_consumer(&self, key: VariantKey, id: &str) {
        if let Some(variant) = self.variant_for(key) {
            variant.unregister_consumer(id);
        }
    }

    pub fn read_from(
        &self,
        key: VariantKey,
        track: TrackKind,
        after_seq: u64,
        limit: usize,
    ) -> Vec<EsSample> {
        if self.closed.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.variant_for(key)
            .map(|v| v.read_from(track, after_seq, limit))
            .unwrap_or_default()
    }

    pub fn read_from_keyframe(
        &self,
        key: VariantKey,
        track: TrackKind,
        after_seq: u64,
        limit: usize,
    ) -> Vec<EsSample> {
        if self.closed.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.variant_for(key)
            .map(|v| v.read_from_keyframe(track, after_seq, limit))
            .unwrap_or_default()
    }

    /// Closes the buffer: subsequent writes are dropped, reads return
    /// empty, but already-registered consumers and variants are left in
    /// place for inspection.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(source) = self.source.read().as_ref() {
            source.close();
        }
        for variant in self.variants.read().values() {
            variant.close();
        }
    }

    pub fn variant_count(&self) -> usize {
        self.variants.read().len() + usize::from(self.source.read().is_some())
    }

    /// Drops derived variants idle for at least `grace` with no active
    /// transcoder (callers are responsible for stopping the transcoder
    /// before this is invoked for a given key).
    pub fn cleanup_idle_variants(&self, grace: std::time::Duration) {
        self.variants
            .write()
            .retain(|_, variant| variant.idle_for() < grace);
    }
}

impl Default for SharedEsBuffer {
    fn default() -> Self {
        Self::new()
    }
}
