use bytes::Bytes;
use media_types::{AudioCodec, VideoCodec};
use mp4::{
    build_init_segment, build_media_segment, AudioTrackInit, TrackInit, TrackSample,
    VideoTrackInit, SAMPLE_FLAG_NON_SYNC,
};
use relay_es::EsSample;

pub const VIDEO_TRACK_ID: u32 = 1;
pub const AUDIO_TRACK_ID: u32 = 2;

#[derive(Debug, Clone)]
pub struct Fmp4TrackConfig {
    pub video_codec: VideoCodec,
    pub width: u16,
    pub height: u16,
    pub video_timescale: u32,
    pub video_config_box: [u8; 4],
    pub video_config_payload: Bytes,
    pub audio: Option<Fmp4AudioConfig>,
}

#[derive(Debug, Clone)]
pub struct Fmp4AudioConfig {
    pub codec: AudioCodec,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub config_box: [u8; 4],
    pub config_payload: Bytes,
}

impl Fmp4TrackConfig {
    fn video_track_init(&self) -> VideoTrackInit {
        VideoTrackInit {
            track_id: VIDEO_TRACK_ID,
            timescale: self.video_timescale,
            codec: self.video_codec,
            width: self.width,
            height: self.height,
            config_box: self.video_config_box,
            config_payload: self.video_config_payload.clone(),
        }
    }

    fn audio_track_init(&self, audio: &Fmp4AudioConfig) -> AudioTrackInit {
        AudioTrackInit {
            track_id: AUDIO_TRACK_ID,
            timescale: audio.sample_rate,
            codec: audio.codec,
            channel_count: audio.channel_count,
            sample_rate: audio.sample_rate,
            config_box: audio.config_box,
            config_payload: audio.config_payload.clone(),
        }
    }

    /// `ftyp`+`moov` with every track, published once as the init segment.
    pub fn combined_init(&self) -> Bytes {
        let mut tracks = vec![TrackInit::Video(self.video_track_init())];
        if let Some(audio) = &self.audio {
            tracks.push(TrackInit::Audio(self.audio_track_init(audio)));
        }
        build_init_segment(&tracks)
    }

    /// A single-track init segment, for DASH's per-`AdaptationSet` request.
    pub fn filtered_init(&self, video: bool) -> Option<Bytes> {
        if video {
            Some(build_init_segment(&[TrackInit::Video(
                self.video_track_init(),
            )]))
        } else {
            self.audio
                .as_ref()
                .map(|audio| build_init_segment(&[TrackInit::Audio(self.audio_track_init(audio))]))
        }
    }
}

fn to_track_samples(samples: &[EsSample], is_video: bool) -> Vec<TrackSample> {
    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let duration = samples
                .get(i + 1)
                .map(|next| next.dts.saturating_sub(sample.dts) as u32)
                .unwrap_or(0);
            let flags = if is_video && !sample.keyframe {
                SAMPLE_FLAG_NON_SYNC
            } else {
                0
            };
            TrackSample {
                data: sample.data.clone(),
                duration,
                flags,
                composition_time_offset: sample.pts as i32 - sample.dts as i32,
            }
        })
        .collect()
}

/// Builds one track's `styp`+`moof`+`mdat` fragment for a segment.
///
/// `sequence` is `seq - first_seq + 1` per the fragment-numbering rule.
pub fn build_fragment(
    track_id: u32,
    sequence: u32,
    base_media_decode_time: u64,
    samples: &[EsSample],
    is_video: bool,
) -> Bytes {
    let track_samples = to_track_samples(samples, is_video);
    build_media_segment(sequence, track_id, base_media_decode_time, &track_samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sample(pts: u64, dts: u64, keyframe: bool) -> EsSample {
        EsSample {
            seq: 0,
            pts,
            dts,
            data: Bytes::from_static(b"x"),
            keyframe,
            received_at: Instant::now(),
        }
    }

    fn config() -> Fmp4TrackConfig {
        Fmp4TrackConfig {
            video_codec: VideoCodec::H264,
            width: 1280,
            height: 720,
            video_timescale: 90_000,
            video_config_box: *b"avcC",
            video_config_payload: Bytes::from_static(b"\x01\x64\x00\x1f"),
            audio: Some(Fmp4AudioConfig {
                codec: AudioCodec::Aac,
                channel_count: 2,
                sample_rate: 48_000,
                config_box: *b"esds",
                config_payload: Bytes::from_static(b"\x00"),
            }),
        }
    }

    #[test]
    fn test_combined_init_has_both_tracks() {
        let init = config().combined_init();
        assert_eq!(&init[4..8], b"ftyp");
    }

    #[test]
    fn test_filtered_init_audio_absent_when_no_audio_track() {
        let mut cfg = config();
        cfg.audio = None;
        assert!(cfg.filtered_init(false).is_none());
        assert!(cfg.filtered_init(true).is_some());
    }

    #[test]
    fn test_build_fragment_last_sample_gets_zero_duration() {
        let samples = vec![sample(0, 0, true), sample(3003, 3003, false)];
        let track_samples = to_track_samples(&samples, true);
        assert_eq!(track_samples[0].duration, 3003);
        assert_eq!(track_samples[1].duration, 0);
        assert_eq!(track_samples[0].flags, 0);
        assert_eq!(track_samples[1].flags, SAMPLE_FLAG_NON_SYNC);
    }

    #[test]
    fn test_build_fragment_round_trips_fourcc() {
        let samples = vec![sample(0, 0, true)];
        let fragment = build_fragment(VIDEO_TRACK_ID, 1, 0, &samples, true);
        assert_eq!(&fragment[4..8], b"styp");
    }
}
