use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// One window-resident segment. In TS mode `bytes` is the full PAT/PMT +
/// PES-wrapped TS packet run for the segment; in fMP4 mode it's one
/// `styp`+`moof`+`mdat` fragment per track (video and audio are muxed
/// separately in fMP4 mode, unlike the single combined stream in TS mode).
#[derive(Debug, Clone)]
pub struct Segment {
    pub seq: u64,
    pub duration: Duration,
    pub bytes: Bytes,
    pub audio_bytes: Option<Bytes>,
}

/// Published once per fMP4-mode variant: `ftyp` + `moov`. Combined init
/// segments carry both tracks' timescale/codec; a filtered (single-track)
/// init segment only fills in the fields for the track it contains.
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub bytes: Bytes,
    /// Hex-encoded SHA-256 of `bytes`, suitable for an HTTP `ETag` header;
    /// a client revalidating the init segment never needs to re-download
    /// it unless the track's codec parameters actually changed.
    pub etag: String,
    pub video_timescale: Option<u32>,
    pub audio_timescale: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl InitSegment {
    pub(crate) fn new(
        bytes: Bytes,
        video_timescale: Option<u32>,
        audio_timescale: Option<u32>,
        video_codec: Option<String>,
        audio_codec: Option<String>,
    ) -> Self {
        let etag = hex::encode(Sha256::digest(&bytes));
        Self {
            bytes,
            etag,
            video_timescale,
            audio_timescale,
            video_codec,
            audio_codec,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// Nominal duration advertised in `#EXT-X-TARGETDURATION` / the DASH
    /// `minimumUpdatePeriod`. Distinct from the boundary trigger below.
    pub target_duration: Duration,
    /// A segment boundary is only considered at a keyframe once the
    /// running duration reaches this threshold.
    pub min_segment_duration: Duration,
    /// Force a cut at this duration even without a keyframe.
    pub max_segment_duration: Duration,
    pub window_size: usize,
    pub fmp4: bool,
}

impl SegmenterConfig {
    pub fn new(target_duration: Duration, window_size: usize, fmp4: bool) -> Self {
        Self {
            target_duration,
            min_segment_duration: Duration::from_secs_f64(1.0).min(target_duration),
            max_segment_duration: target_duration * 2,
            window_size,
            fmp4,
        }
    }
}
