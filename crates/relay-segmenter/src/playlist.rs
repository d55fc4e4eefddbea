//! HLS media playlist and DASH MPD text generation. Hand-built rather than
//! going through an XML object model, matching how `mp4::write` and
//! `ts::mux` build their wire formats a field at a time.

use std::fmt::Write as _;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::segment::Segment;

pub struct PlaylistInput<'a> {
    pub channel_id: &'a str,
    pub target_duration: Duration,
    pub first_seq: u64,
    pub segments: &'a [Segment],
    pub fmp4: bool,
}

/// Builds an HLS media playlist listing every window-resident segment.
pub fn build_hls_media_playlist(input: &PlaylistInput<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-VERSION:7");
    let _ = writeln!(
        out,
        "#EXT-X-TARGETDURATION:{}",
        input.target_duration.as_secs_f64().ceil() as u64
    );
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", input.first_seq);
    if input.fmp4 {
        let _ = writeln!(
            out,
            "#EXT-X-MAP:URI=\"/stream/{}?format=hls&init=1\"",
            input.channel_id
        );
    }
    for segment in input.segments {
        let _ = writeln!(out, "#EXTINF:{:.3},", segment.duration.as_secs_f64());
        let _ = writeln!(
            out,
            "/stream/{}?format=hls&seg={}",
            input.channel_id, segment.seq
        );
    }
    out
}

pub struct DashManifestInput<'a> {
    pub channel_id: &'a str,
    pub target_duration: Duration,
    pub availability_start_time: SystemTime,
    pub first_seq: u64,
    pub segments: &'a [Segment],
    pub has_audio: bool,
}

fn xs_duration(d: Duration) -> String {
    format!("PT{:.3}S", d.as_secs_f64())
}

fn xs_datetime(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Builds a live CMAF DASH manifest with separate video/audio AdaptationSets
/// sharing the same segment-sequence numbering.
pub fn build_dash_manifest(input: &DashManifestInput<'_>) -> String {
    let window_duration = input
        .segments
        .iter()
        .fold(Duration::ZERO, |acc, s| acc + s.duration);
    let time_shift_buffer_depth = window_duration.max(input.target_duration * 3);

    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        out,
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-live:2011" type="dynamic" availabilityStartTime="{}" publishTime="{}" minimumUpdatePeriod="{}" suggestedPresentationDelay="{}" timeShiftBufferDepth="{}">"#,
        xs_datetime(input.availability_start_time),
        xs_datetime(SystemTime::now()),
        xs_duration(input.target_duration),
        xs_duration(input.target_duration * 3),
        xs_duration(time_shift_buffer_depth),
    );
    let _ = writeln!(out, "  <Period id=\"0\" start=\"PT0S\">");

    write_adaptation_set(&mut out, input, true);
    if input.has_audio {
        write_adaptation_set(&mut out, input, false);
    }

    let _ = writeln!(out, "  </Period>");
    let _ = writeln!(out, "</MPD>");
    out
}

fn write_adaptation_set(out: &mut String, input: &DashManifestInput<'_>, video: bool) {
    let (content_type, mime, track) = if video {
        ("video", "video/mp4", "video")
    } else {
        ("audio", "audio/mp4", "audio")
    };

    let _ = writeln!(
        out,
        "    <AdaptationSet id=\"{track}\" contentType=\"{content_type}\" mimeType=\"{mime}\" segmentAlignment=\"true\">"
    );
    let _ = writeln!(out, "      <Representation id=\"{track}-0\" bandwidth=\"0\">");
    let _ = writeln!(
        out,
        "        <SegmentTemplate timescale=\"90000\" initialization=\"/stream/{}?format=dash&amp;init=1&amp;track={track}\" media=\"/stream/{}?format=dash&amp;seg=$Number$&amp;track={track}\" startNumber=\"{}\"/>",
        input.channel_id, input.channel_id, input.first_seq
    );
    let _ = writeln!(out, "      </Representation>");
    let _ = writeln!(out, "    </AdaptationSet>");
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use bytes::Bytes;

    fn segments() -> Vec<Segment> {
        vec![
            Segment {
                seq: 5,
                duration: Duration::from_secs_f64(2.0),
                bytes: Bytes::from_static(b"a"),
                audio_bytes: None,
            },
            Segment {
                seq: 6,
                duration: Duration::from_secs_f64(2.1),
                bytes: Bytes::from_static(b"b"),
                audio_bytes: None,
            },
        ]
    }

    #[test]
    fn test_hls_playlist_media_sequence_is_oldest_resident() {
        let segs = segments();
        let input = PlaylistInput {
            channel_id: "abc",
            target_duration: Duration::from_secs(2),
            first_seq: 5,
            segments: &segs,
            fmp4: false,
        };
        let playlist = build_hls_media_playlist(&input);
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:5"));
        assert!(playlist.contains("seg=5"));
        assert!(playlist.contains("seg=6"));
        assert!(!playlist.contains("EXT-X-MAP"));
    }

    #[test]
    fn test_hls_playlist_fmp4_includes_map_uri() {
        let segs = segments();
        let input = PlaylistInput {
            channel_id: "abc",
            target_duration: Duration::from_secs(2),
            first_seq: 5,
            segments: &segs,
            fmp4: true,
        };
        let playlist = build_hls_media_playlist(&input);
        assert!(playlist.contains("#EXT-X-MAP:URI=\"/stream/abc?format=hls&init=1\""));
    }

    #[test]
    fn test_dash_manifest_has_two_adaptation_sets_with_audio() {
        let segs = segments();
        let input = DashManifestInput {
            channel_id: "abc",
            target_duration: Duration::from_secs(2),
            availability_start_time: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            first_seq: 5,
            segments: &segs,
            has_audio: true,
        };
        let manifest = build_dash_manifest(&input);
        assert_eq!(manifest.matches("<AdaptationSet").count(), 2);
        assert!(manifest.contains("track=video"));
        assert!(manifest.contains("track=audio"));
        assert!(manifest.contains("type=\"dynamic\""));
    }

    #[test]
    fn test_dash_manifest_time_shift_buffer_depth_floors_at_three_times_target() {
        let segs = vec![segments().remove(0)];
        let input = DashManifestInput {
            channel_id: "abc",
            target_duration: Duration::from_secs(4),
            availability_start_time: UNIX_EPOCH,
            first_seq: 5,
            segments: &segs,
            has_audio: false,
        };
        let manifest = build_dash_manifest(&input);
        assert!(manifest.contains(&format!("timeShiftBufferDepth=\"{}\"", xs_duration(Duration::from_secs(12)))));
    }

    #[test]
    fn test_xs_datetime_known_epoch() {
        assert_eq!(xs_datetime(UNIX_EPOCH), "1970-01-01T00:00:00Z");
    }
}
