use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::sample::{EsSample, TrackKind};
use crate::track::EsTrack;

pub const DEFAULT_BYTE_CAP: u64 = 30 * 1024 * 1024;
/// 120s at a 90 kHz clock.
pub const DEFAULT_DURATION_CAP_TICKS: u64 = 120 * 90_000;

/// A named reader's acknowledged read position within a variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerPosition {
    pub video_seq: u64,
    pub audio_seq: u64,
}

/// Two ES tracks (video, audio) sharing one byte cap and one wall-clock
/// duration cap, plus the set of consumers reading from them.
///
/// Invariant: resident bytes across both tracks never exceed `byte_cap`;
/// `oldest_pts >= newest_pts - duration_cap_ticks`. Sample count is not
/// itself a cap, only ever a consequence of the two above.
pub struct EsVariant {
    pub video: EsTrack,
    pub audio: EsTrack,
    byte_cap: u64,
    duration_cap_ticks: u64,
    consumers: RwLock<HashMap<String, ConsumerPosition>>,
    is_source: bool,
    last_activity: RwLock<Instant>,
    closed: AtomicBool,
}

impl EsVariant {
    pub fn new(is_source: bool) -> Self {
        Self::with_caps(is_source, DEFAULT_BYTE_CAP, DEFAULT_DURATION_CAP_TICKS)
    }

    pub fn with_caps(is_source: bool, byte_cap: u64, duration_cap_ticks: u64) -> Self {
        Self {
            video: EsTrack::new(TrackKind::Video),
            audio: EsTrack::new(TrackKind::Audio),
            byte_cap,
            duration_cap_ticks,
            consumers: RwLock::new(HashMap::new()),
            is_source,
            last_activity: RwLock::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_source(&self) -> bool {
        self.is_source
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.read().elapsed()
    }

    fn track(&self, kind: TrackKind) -> &EsTrack {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    pub fn write_video(&self, pts: u64, dts: u64, data: Bytes, keyframe: bool) {
        if self.is_closed() {
            return;
        }
        self.video.push(pts, dts, data, keyframe);
        self.touch();
        self.enforce_caps();
    }

    pub fn write_audio(&self, pts: u64, data: Bytes) {
        if self.is_closed() {
            return;
        }
        self.audio.push(pts, pts, data, false);
        self.touch();
        self.enforce_caps();
    }

    fn resident_bytes(&self) -> u64 {
        self.video.resident_bytes() + self.audio.resident_bytes()
    }

    fn newest_pts(&self) -> Option<u64> {
        match (self.video.newest_pts(), self.audio.newest_pts()) {
            (Some(v), Some(a)) => Some(v.max(a)),
            (Some(v), None) => Some(v),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    /// Evicts from whichever track has the smaller oldest PTS until both
    /// the byte cap and the duration cap are satisfied. The duration and
    /// byte caps always win over any consumer still reading the evicted
    /// sample: a consumer that falls behind is silently lapped.
    fn enforce_caps(&self) {
        loop {
            let over_bytes = self.resident_bytes() > self.byte_cap;
            let over_duration = match (self.video.oldest_pts(), self.newest_pts()) {
                (Some(oldest), Some(newest)) => {
                    newest.saturating_sub(oldest) > self.duration_cap_ticks
                }
                _ => false,
            } || match (self.audio.oldest_pts(), self.newest_pts()) {
                (Some(oldest), Some(newest)) => {
                    newest.saturating_sub(oldest) > self.duration_cap_ticks
                }
                _ => false,
            };

            if !over_bytes && !over_duration {
                break;
            }

            let video_oldest = self.video.oldest_pts();
            let audio_oldest = self.audio.oldest_pts();
            let evict_kind = match (video_oldest, audio_oldest) {
                (Some(v), Some(a)) if v <= a => TrackKind::Video,
                (Some(_), Some(_)) => TrackKind::Audio,
                (Some(_), None) => TrackKind::Video,
                (None, Some(_)) => TrackKind::Audio,
                (None, None) => break,
            };
            if self.track(evict_kind).evict_front().is_none() {
                break;
            }
        }
    }

    pub fn register_consumer(&self, id: impl Into<String>) {
        self.consumers
            .write()
            .entry(id.into())
            .or_insert_with(ConsumerPosition::default);
    }

    pub fn update_consumer_position(&self, id: &str, video_seq: u64, audio_seq: u64) {
        if let Some(pos) = self.consumers.write().get_mut(id) {
            pos.video_seq = video_seq;
            pos.audio_seq = audio_seq;
        }
    }

    pub fn unregister_consumer(&self, id: &str) {
        self.consumers.write().remove(id);
    }

    pub fn consumer_position(&self, id: &str) -> Option<ConsumerPosition> {
        self.consumers.read().get(id).copied()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    pub fn read_from(&self, kind: TrackKind, after_seq: u64, limit: usize) -> Vec<EsSample> {
        if self.is_closed() {
            return Vec::new();
        }
        self.track(kind).read_from(after_seq, limit)
    }

    pub fn read_from_keyframe(&self, kind: TrackKind, after_seq: u64, limit: usize) -> Vec<EsSample> {
        if self.is_closed() {
            return Vec::new();
        }
        self.track(kind).read_from_keyframe(after_seq, limit)
    }
}
