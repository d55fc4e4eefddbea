use std::time::Instant;

use bytes::Bytes;
pub use media_types::{AudioCodec, VideoCodec};

/// Identifies a codec variant as a video-codec x audio-codec pair, e.g.
/// `h264/aac`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub video: VideoCodec,
    pub audio: AudioCodec,
}

impl VariantKey {
    pub fn new(video: VideoCodec, audio: AudioCodec) -> Self {
        Self { video, audio }
    }
}

/// Which track within a variant a read or write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One NAL unit (video) or audio frame, ordered by a monotonically
/// increasing per-track sequence number.
#[derive(Debug, Clone)]
pub struct EsSample {
    pub seq: u64,
    pub pts: u64,
    pub dts: u64,
    pub data: Bytes,
    /// Only meaningful on the video track; always `false` for audio.
    pub keyframe: bool,
    pub received_at: Instant,
}

impl EsSample {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
