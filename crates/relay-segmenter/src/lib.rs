//! Turns one elementary-stream variant into a rolling window of HLS/DASH
//! segments plus their playlists and manifests.
//!
//! Grounded on `mp4::write` (fMP4 box construction) and `ts::mux` (TS
//! packetization); the keyframe-gated boundary rule and window/eviction
//! shape follow `relay-es::EsVariant`'s byte/duration-capped ring buffer.

mod error;
mod fmp4_mode;
mod playlist;
mod segment;
mod ts_mode;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use relay_es::{EsSample, TrackKind};
use tokio::sync::Notify;
use ts::pmt::StreamType;

pub use error::SegmenterError;
pub use fmp4_mode::{Fmp4AudioConfig, Fmp4TrackConfig};
pub use playlist::{build_dash_manifest, build_hls_media_playlist, DashManifestInput, PlaylistInput};
pub use segment::{InitSegment, Segment, SegmenterConfig};

use fmp4_mode::{build_fragment, AUDIO_TRACK_ID, VIDEO_TRACK_ID};
use ts_mode::TsEncoder;

#[derive(Debug, Clone, Copy)]
pub struct SegmentInfo {
    pub seq: u64,
    pub duration: Duration,
}

enum Mode {
    Ts(TsEncoder),
    Fmp4 {
        track_config: Fmp4TrackConfig,
        combined_init: Bytes,
        video_init: Bytes,
        audio_init: Option<Bytes>,
    },
}

/// Rolling segment window for one ES variant.
///
/// Not internally synchronized: callers share it behind their own lock, the
/// way `relay-es::EsVariant`'s tracks are owned by the variant rather than
/// locking themselves.
pub struct Segmenter {
    config: SegmenterConfig,
    clock_rate: u32,
    mode: Mode,
    window: VecDeque<Segment>,
    first_seq_ever: Option<u64>,
    next_seq: u64,
    stream_start_time: Option<SystemTime>,
    pending_video: Vec<EsSample>,
    pending_audio: Vec<EsSample>,
    ready_notify: Arc<Notify>,
}

impl Segmenter {
    pub fn new_ts(
        config: SegmenterConfig,
        clock_rate: u32,
        video_stream_type: StreamType,
        audio_stream_type: Option<StreamType>,
    ) -> Self {
        Self::new(
            config,
            clock_rate,
            Mode::Ts(TsEncoder::new(video_stream_type, audio_stream_type)),
        )
    }

    pub fn new_fmp4(config: SegmenterConfig, clock_rate: u32, track_config: Fmp4TrackConfig) -> Self {
        let combined_init = track_config.combined_init();
        let video_init = track_config
            .filtered_init(true)
            .expect("video track is always present");
        let audio_init = track_config.filtered_init(false);
        Self::new(
            config,
            clock_rate,
            Mode::Fmp4 {
                track_config,
                combined_init,
                video_init,
                audio_init,
            },
        )
    }

    fn new(config: SegmenterConfig, clock_rate: u32, mode: Mode) -> Self {
        Self {
            config,
            clock_rate,
            mode,
            window: VecDeque::new(),
            first_seq_ever: None,
            next_seq: 0,
            stream_start_time: None,
            pending_video: Vec::new(),
            pending_audio: Vec::new(),
            ready_notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_fmp4(&self) -> bool {
        matches!(self.mode, Mode::Fmp4 { .. })
    }

    pub fn target_duration(&self) -> Duration {
        self.config.target_duration
    }

    pub fn stream_start_time(&self) -> Option<SystemTime> {
        self.stream_start_time
    }

    /// A handle callers can `notified().await` on (outside their own lock)
    /// to wait for the next segment cut, per the DASH "wait for the second
    /// segment" failure-mode rule.
    pub fn ready_notify(&self) -> Arc<Notify> {
        self.ready_notify.clone()
    }

    pub fn segment_infos(&self) -> Vec<SegmentInfo> {
        self.window
            .iter()
            .map(|s| SegmentInfo {
                seq: s.seq,
                duration: s.duration,
            })
            .collect()
    }

    pub fn get_segment(&self, seq: u64) -> Result<Segment, SegmenterError> {
        self.window
            .iter()
            .find(|s| s.seq == seq)
            .cloned()
            .ok_or(SegmenterError::SegmentNotFound(seq))
    }

    pub fn get_init_segment(&self) -> Option<InitSegment> {
        match &self.mode {
            Mode::Fmp4 {
                track_config,
                combined_init,
                ..
            } => Some(InitSegment::new(
                combined_init.clone(),
                Some(track_config.video_timescale),
                track_config.audio.as_ref().map(|a| a.sample_rate),
                Some(format!("{:?}", track_config.video_codec)),
                track_config.audio.as_ref().map(|a| format!("{:?}", a.codec)),
            )),
            Mode::Ts(_) => None,
        }
    }

    pub fn get_filtered_init_segment(&self, track: TrackKind) -> Option<InitSegment> {
        match &self.mode {
            Mode::Fmp4 {
                track_config,
                video_init,
                audio_init,
                ..
            } => match track {
                TrackKind::Video => Some(InitSegment::new(
                    video_init.clone(),
                    Some(track_config.video_timescale),
                    None,
                    Some(format!("{:?}", track_config.video_codec)),
                    None,
                )),
                TrackKind::Audio => {
                    let audio = track_config.audio.as_ref()?;
                    let bytes = audio_init.clone()?;
                    Some(InitSegment::new(
                        bytes,
                        None,
                        Some(audio.sample_rate),
                        None,
                        Some(format!("{:?}", audio.codec)),
                    ))
                }
            },
            Mode::Ts(_) => None,
        }
    }

    /// Pushes one video sample. If it's a keyframe that would already put
    /// the running segment at or past `min_segment_duration`, the pending
    /// samples are cut into a segment first and this sample opens the next
    /// one. Otherwise it's force-cut once it reaches `max_segment_duration`
    /// regardless of keyframe alignment.
    pub fn push_video(&mut self, sample: EsSample) {
        if sample.keyframe {
            if let Some(first) = self.pending_video.first() {
                let projected = Duration::from_secs_f64(
                    sample.dts.saturating_sub(first.dts) as f64 / self.clock_rate as f64,
                );
                if projected >= self.config.min_segment_duration {
                    self.cut_segment();
                }
            }
        }
        self.pending_video.push(sample);
        if self.running_duration() >= self.config.max_segment_duration {
            self.cut_segment();
        }
    }

    pub fn push_audio(&mut self, sample: EsSample) {
        self.pending_audio.push(sample);
    }

    fn running_duration(&self) -> Duration {
        match (self.pending_video.first(), self.pending_video.last()) {
            (Some(first), Some(last)) if last.dts >= first.dts => {
                Duration::from_secs_f64((last.dts - first.dts) as f64 / self.clock_rate as f64)
            }
            _ => Duration::ZERO,
        }
    }

    fn cut_segment(&mut self) {
        if self.pending_video.is_empty() {
            return;
        }

        if self.stream_start_time.is_none() {
            self.stream_start_time = Some(SystemTime::now());
        }

        let seq = self.next_seq;
        let first_seq_ever = *self.first_seq_ever.get_or_insert(seq);
        let duration = self.running_duration();

        let (bytes, audio_bytes) = match &mut self.mode {
            Mode::Ts(encoder) => (
                encoder.encode_segment(&self.pending_video, &self.pending_audio),
                None,
            ),
            Mode::Fmp4 { .. } => {
                let sequence = (seq - first_seq_ever + 1) as u32;
                let base_media_decode_time = self.pending_video[0].dts;
                let video_fragment = build_fragment(
                    VIDEO_TRACK_ID,
                    sequence,
                    base_media_decode_time,
                    &self.pending_video,
                    true,
                );
                let audio_fragment = (!self.pending_audio.is_empty()).then(|| {
                    build_fragment(
                        AUDIO_TRACK_ID,
                        sequence,
                        self.pending_audio[0].dts,
                        &self.pending_audio,
                        false,
                    )
                });
                (video_fragment, audio_fragment)
            }
        };

        self.window.push_back(Segment {
            seq,
            duration,
            bytes,
            audio_bytes,
        });
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }

        self.next_seq += 1;
        self.pending_video.clear();
        self.pending_audio.clear();
        self.ready_notify.notify_waiters();
    }

    pub fn hls_playlist(&self, channel_id: &str) -> String {
        let segments: Vec<Segment> = self.window.iter().cloned().collect();
        build_hls_media_playlist(&PlaylistInput {
            channel_id,
            target_duration: self.config.target_duration,
            first_seq: self.window.front().map(|s| s.seq).unwrap_or(self.next_seq),
            segments: &segments,
            fmp4: self.is_fmp4(),
        })
    }

    pub fn dash_manifest(&self, channel_id: &str) -> Result<String, SegmenterError> {
        if self.window.len() < 2 {
            return Err(SegmenterError::TooEarly);
        }
        let segments: Vec<Segment> = self.window.iter().cloned().collect();
        let has_audio = matches!(&self.mode, Mode::Fmp4 { audio_init: Some(_), .. });
        Ok(build_dash_manifest(&DashManifestInput {
            channel_id,
            target_duration: self.config.target_duration,
            availability_start_time: self.stream_start_time.unwrap_or(SystemTime::UNIX_EPOCH),
            first_seq: self.window.front().map(|s| s.seq).unwrap_or(self.next_seq),
            segments: &segments,
            has_audio,
        }))
    }
}
