use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::sample::{EsSample, TrackKind};

/// Codec identity and out-of-band init data (H.264 SPS/PPS, H.265
/// VPS/SPS/PPS, AAC AudioSpecificConfig, AV1/VP9/Opus descriptors).
#[derive(Debug, Clone, Default)]
pub struct CodecInfo {
    pub tag: Option<String>,
    pub init_data: Option<Bytes>,
}

/// A ring of [`EsSample`]s for one track (video or audio) of one variant.
///
/// Sequences are strictly increasing. Video PTS need not be strictly
/// increasing (B-frames reorder), but DTS must be; audio has no reordering
/// so its DTS tracks PTS. Eviction is driven by the owning variant, which
/// enforces the byte and duration caps across both tracks together.
pub struct EsTrack {
    kind: TrackKind,
    samples: RwLock<VecDeque<EsSample>>,
    next_seq: AtomicU64,
    codec: RwLock<CodecInfo>,
    resident_bytes: AtomicU64,
    /// Single-slot wakeup: readers that miss a notification just re-check
    /// state on their next poll rather than blocking the writer.
    notify: Notify,
}

impl EsTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            samples: RwLock::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            codec: RwLock::new(CodecInfo::default()),
            resident_bytes: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn set_codec(&self, tag: impl Into<String>, init_data: Bytes) {
        *self.codec.write() = CodecInfo {
            tag: Some(tag.into()),
            init_data: Some(init_data),
        };
    }

    pub fn codec(&self) -> CodecInfo {
        self.codec.read().clone()
    }

    /// Appends a sample, assigning it the next sequence number.
    pub fn push(&self, pts: u64, dts: u64, data: Bytes, keyframe: bool) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let len = data.len() as u64;
        let sample = EsSample {
            seq,
            pts,
            dts,
            data,
            keyframe,
            received_at: std::time::Instant::now(),
        };
        self.samples.write().push_back(sample);
        self.resident_bytes.fetch_add(len, Ordering::SeqCst);
        self.notify.notify_waiters();
        seq
    }

    /// Evicts the oldest sample, returning its byte length, if any.
    pub fn evict_front(&self) -> Option<usize> {
        let mut samples = self.samples.write();
        let sample = samples.pop_front()?;
        self.resident_bytes
            .fetch_sub(sample.byte_len() as u64, Ordering::SeqCst);
        Some(sample.byte_len())
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes.load(Ordering::SeqCst)
    }

    pub fn oldest_pts(&self) -> Option<u64> {
        self.samples.read().front().map(|s| s.pts)
    }

    pub fn newest_pts(&self) -> Option<u64> {
        self.samples.read().back().map(|s| s.pts)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    /// Samples with `seq > after_seq`, oldest first, capped at `limit`.
    pub fn read_from(&self, after_seq: u64, limit: usize) -> Vec<EsSample> {
        self.samples
            .read()
            .iter()
            .filter(|s| s.seq > after_seq)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Like [`Self::read_from`] but skips ahead to the first keyframe with
    /// `seq > after_seq`, so a new consumer always starts on a decodable
    /// boundary.
    pub fn read_from_keyframe(&self, after_seq: u64, limit: usize) -> Vec<EsSample> {
        let samples = self.samples.read();
        let mut iter = samples.iter().filter(|s| s.seq > after_seq);
        let Some(start) = iter.find(|s| s.keyframe) else {
            return Vec::new();
        };
        std::iter::once(start.clone())
            .chain(iter.take(limit.saturating_sub(1)).cloned())
            .collect()
    }

    pub async fn wait_for_write(&self) {
        self.notify.notified().await;
    }
}
