//! fMP4 (ISOBMFF fragmented MP4 / CMAF) box writers.
//!
//! Builds the subset of the ISO/IEC 14496-12 box tree the HLS/DASH segmenter
//! needs: an init segment (`ftyp` + `moov`, with `mvex` for fragmentation) and
//! media segments (`styp` + `moof` + `mdat`). Mirrors the box layouts that
//! [`crate::box_utils`] reads, in the opposite direction.

use bytes::{BufMut, Bytes, BytesMut};
use media_types::{AudioCodec, VideoCodec};

fn build_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

fn build_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.push(version);
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    build_box(fourcc, &body)
}

fn concat(boxes: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(boxes.iter().map(Vec::len).sum());
    for b in boxes {
        out.extend_from_slice(b);
    }
    out
}

/// A video track's init-time parameters.
#[derive(Debug, Clone)]
pub struct VideoTrackInit {
    pub track_id: u32,
    pub timescale: u32,
    pub codec: VideoCodec,
    pub width: u16,
    pub height: u16,
    /// Decoder configuration record box FourCC, e.g. `*b"avcC"`, `*b"hvcC"`, `*b"av1C"`.
    pub config_box: [u8; 4],
    pub config_payload: Bytes,
}

/// An audio track's init-time parameters.
#[derive(Debug, Clone)]
pub struct AudioTrackInit {
    pub track_id: u32,
    pub timescale: u32,
    pub codec: AudioCodec,
    pub channel_count: u16,
    pub sample_rate: u32,
    /// Decoder configuration box FourCC, e.g. `*b"esds"`, `*b"dOps"`.
    pub config_box: [u8; 4],
    pub config_payload: Bytes,
}

#[derive(Debug, Clone)]
pub enum TrackInit {
    Video(VideoTrackInit),
    Audio(AudioTrackInit),
}

impl TrackInit {
    fn track_id(&self) -> u32 {
        match self {
            TrackInit::Video(v) => v.track_id,
            TrackInit::Audio(a) => a.track_id,
        }
    }

    fn timescale(&self) -> u32 {
        match self {
            TrackInit::Video(v) => v.timescale,
            TrackInit::Audio(a) => a.timescale,
        }
    }

    fn is_video(&self) -> bool {
        matches!(self, TrackInit::Video(_))
    }
}

fn sample_entry_fourcc_video(codec: VideoCodec) -> [u8; 4] {
    match codec {
        VideoCodec::H264 => *b"avc1",
        VideoCodec::H265 => *b"hvc1",
        VideoCodec::Av1 => *b"av01",
        VideoCodec::Vp9 => *b"vp09",
    }
}

fn sample_entry_fourcc_audio(codec: AudioCodec) -> [u8; 4] {
    match codec {
        AudioCodec::Aac => *b"mp4a",
        AudioCodec::Ac3 => *b"ac-3",
        AudioCodec::Eac3 => *b"ec-3",
        AudioCodec::Mp3 => *b".mp3",
        AudioCodec::Opus => *b"Opus",
    }
}

fn build_video_sample_entry(t: &VideoTrackInit) -> Vec<u8> {
    let config = build_box(&t.config_box, &t.config_payload);

    let mut body = Vec::with_capacity(78 + config.len());
    body.extend_from_slice(&[0u8; 6]); // reserved
    body.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    body.extend_from_slice(&[0u8; 16]); // pre_defined / reserved
    body.extend_from_slice(&t.width.to_be_bytes());
    body.extend_from_slice(&t.height.to_be_bytes());
    body.extend_from_slice(&0x00480000u32.to_be_bytes()); // horizresolution 72dpi
    body.extend_from_slice(&0x00480000u32.to_be_bytes()); // vertresolution 72dpi
    body.extend_from_slice(&[0u8; 4]); // reserved
    body.extend_from_slice(&1u16.to_be_bytes()); // frame_count
    body.extend_from_slice(&[0u8; 32]); // compressorname
    body.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
    body.extend_from_slice(&0xFFFFu16.to_be_bytes()); // pre_defined (-1)
    body.extend_from_slice(&config);

    build_box(&sample_entry_fourcc_video(t.codec), &body)
}

fn build_audio_sample_entry(t: &AudioTrackInit) -> Vec<u8> {
    let config = build_box(&t.config_box, &t.config_payload);

    let mut body = Vec::with_capacity(20 + config.len());
    body.extend_from_slice(&[0u8; 6]); // reserved
    body.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    body.extend_from_slice(&[0u8; 8]); // reserved (version/revision/vendor)
    body.extend_from_slice(&t.channel_count.to_be_bytes());
    body.extend_from_slice(&16u16.to_be_bytes()); // samplesize
    body.extend_from_slice(&[0u8; 4]); // pre_defined / reserved
    let sample_rate_fixed = (t.sample_rate as u32) << 16;
    body.extend_from_slice(&sample_rate_fixed.to_be_bytes());
    body.extend_from_slice(&config);

    build_box(&sample_entry_fourcc_audio(t.codec), &body)
}

fn build_stsd(track: &TrackInit) -> Vec<u8> {
    let entry = match track {
        TrackInit::Video(v) => build_video_sample_entry(v),
        TrackInit::Audio(a) => build_audio_sample_entry(a),
    };

    let mut payload = Vec::with_capacity(4 + entry.len());
    payload.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    payload.extend_from_slice(&entry);
    build_full_box(b"stsd", 0, 0, &payload)
}

fn build_empty_table_boxes() -> Vec<u8> {
    let stts = build_full_box(b"stts", 0, 0, &0u32.to_be_bytes());
    let stsc = build_full_box(b"stsc", 0, 0, &0u32.to_be_bytes());
    let stsz = build_full_box(b"stsz", 0, 0, &[0u8; 4 + 4]); // sample_size=0, sample_count=0
    let stco = build_full_box(b"stco", 0, 0, &0u32.to_be_bytes());
    concat(&[stts, stsc, stsz, stco])
}

fn build_stbl(track: &TrackInit) -> Vec<u8> {
    let stsd = build_stsd(track);
    let tables = build_empty_table_boxes();
    let mut body = Vec::with_capacity(stsd.len() + tables.len());
    body.extend_from_slice(&stsd);
    body.extend_from_slice(&tables);
    build_box(b"stbl", &body)
}

fn build_dinf() -> Vec<u8> {
    let url = build_full_box(b"url ", 0, 1, &[]);
    let mut dref_payload = Vec::new();
    dref_payload.extend_from_slice(&1u32.to_be_bytes());
    dref_payload.extend_from_slice(&url);
    let dref = build_full_box(b"dref", 0, 0, &dref_payload);
    build_box(b"dinf", &dref)
}

fn build_mdhd(timescale: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    payload.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    payload.extend_from_slice(&timescale.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes()); // duration (unknown, fragmented)
    payload.extend_from_slice(&0x55C4u16.to_be_bytes()); // language "und"
    payload.extend_from_slice(&0u16.to_be_bytes()); // pre_defined
    build_full_box(b"mdhd", 0, 0, &payload)
}

fn build_hdlr(is_video: bool) -> Vec<u8> {
    let (handler_type, name): (&[u8; 4], &[u8]) = if is_video {
        (b"vide", b"VideoHandler\0")
    } else {
        (b"soun", b"SoundHandler\0")
    };
    let mut payload = Vec::new();
    payload.extend_from_slice(&0u32.to_be_bytes()); // pre_defined
    payload.extend_from_slice(handler_type);
    payload.extend_from_slice(&[0u8; 12]); // reserved
    payload.extend_from_slice(name);
    build_full_box(b"hdlr", 0, 0, &payload)
}

fn build_minf(track: &TrackInit) -> Vec<u8> {
    let media_header = if track.is_video() {
        build_full_box(b"vmhd", 0, 1, &[0u8; 8])
    } else {
        build_full_box(b"smhd", 0, 0, &[0u8; 4])
    };
    let dinf = build_dinf();
    let stbl = build_stbl(track);

    let mut body = Vec::with_capacity(media_header.len() + dinf.len() + stbl.len());
    body.extend_from_slice(&media_header);
    body.extend_from_slice(&dinf);
    body.extend_from_slice(&stbl);
    build_box(b"minf", &body)
}

fn build_mdia(track: &TrackInit) -> Vec<u8> {
    let mdhd = build_mdhd(track.timescale());
    let hdlr = build_hdlr(track.is_video());
    let minf = build_minf(track);

    let mut body = Vec::with_capacity(mdhd.len() + hdlr.len() + minf.len());
    body.extend_from_slice(&mdhd);
    body.extend_from_slice(&hdlr);
    body.extend_from_slice(&minf);
    build_box(b"mdia", &body)
}

fn build_tkhd(track: &TrackInit) -> Vec<u8> {
    let (width, height) = match track {
        TrackInit::Video(v) => (v.width, v.height),
        TrackInit::Audio(_) => (0, 0),
    };

    let mut payload = Vec::with_capacity(80);
    payload.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    payload.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    payload.extend_from_slice(&track.track_id().to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes()); // reserved
    payload.extend_from_slice(&0u32.to_be_bytes()); // duration (unknown)
    payload.extend_from_slice(&[0u8; 8]); // reserved
    payload.extend_from_slice(&0u16.to_be_bytes()); // layer
    payload.extend_from_slice(&0u16.to_be_bytes()); // alternate_group
    payload.extend_from_slice(&if track.is_video() { 0u16 } else { 0x0100u16 }.to_be_bytes()); // volume
    payload.extend_from_slice(&0u16.to_be_bytes()); // reserved
    // unity matrix
    for v in [0x00010000i32, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000] {
        payload.extend_from_slice(&v.to_be_bytes());
    }
    payload.extend_from_slice(&(u32::from(width) << 16).to_be_bytes());
    payload.extend_from_slice(&(u32::from(height) << 16).to_be_bytes());

    // tkhd flags: track_enabled | track_in_movie
    build_full_box(b"tkhd", 0, 0x000003, &payload)
}

fn build_trak(track: &TrackInit) -> Vec<u8> {
    let tkhd = build_tkhd(track);
    let mdia = build_mdia(track);
    let mut body = Vec::with_capacity(tkhd.len() + mdia.len());
    body.extend_from_slice(&tkhd);
    body.extend_from_slice(&mdia);
    build_box(b"trak", &body)
}

fn build_trex(track_id: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(&track_id.to_be_bytes());
    payload.extend_from_slice(&1u32.to_be_bytes()); // default_sample_description_index
    payload.extend_from_slice(&0u32.to_be_bytes()); // default_sample_duration
    payload.extend_from_slice(&0u32.to_be_bytes()); // default_sample_size
    payload.extend_from_slice(&0u32.to_be_bytes()); // default_sample_flags
    build_full_box(b"trex", 0, 0, &payload)
}

fn build_mvhd(timescale: u32, next_track_id: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(96);
    payload.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    payload.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    payload.extend_from_slice(&timescale.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes()); // duration (unknown, fragmented)
    payload.extend_from_slice(&0x00010000u32.to_be_bytes()); // rate 1.0
    payload.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
    payload.extend_from_slice(&0u16.to_be_bytes()); // reserved
    payload.extend_from_slice(&[0u8; 8]); // reserved
    for v in [0x00010000i32, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000] {
        payload.extend_from_slice(&v.to_be_bytes());
    }
    payload.extend_from_slice(&[0u8; 24]); // pre_defined
    payload.extend_from_slice(&next_track_id.to_be_bytes());
    build_full_box(b"mvhd", 0, 0, &payload)
}

/// Build the init segment (`ftyp` + `moov`) for the given tracks.
///
/// Tracks must be ordered by ascending `track_id`; this is not validated
/// since the segmenter always constructs them that way.
pub fn build_init_segment(tracks: &[TrackInit]) -> Bytes {
    let ftyp_payload = {
        let mut p = Vec::new();
        p.extend_from_slice(b"iso5");
        p.extend_from_slice(&512u32.to_be_bytes());
        p.extend_from_slice(b"iso5");
        p.extend_from_slice(b"iso6");
        p.extend_from_slice(b"mp41");
        p
    };
    let ftyp = build_box(b"ftyp", &ftyp_payload);

    let movie_timescale = tracks.first().map(TrackInit::timescale).unwrap_or(1000);
    let next_track_id = tracks.iter().map(TrackInit::track_id).max().unwrap_or(0) + 1;
    let mvhd = build_mvhd(movie_timescale, next_track_id);

    let traks: Vec<Vec<u8>> = tracks.iter().map(build_trak).collect();
    let trexs: Vec<Vec<u8>> = tracks.iter().map(|t| build_trex(t.track_id())).collect();
    let mvex = build_box(b"mvex", &concat(&trexs));

    let mut moov_body = Vec::new();
    moov_body.extend_from_slice(&mvhd);
    for trak in &traks {
        moov_body.extend_from_slice(trak);
    }
    moov_body.extend_from_slice(&mvex);
    let moov = build_box(b"moov", &moov_body);

    let mut out = BytesMut::with_capacity(ftyp.len() + moov.len());
    out.put_slice(&ftyp);
    out.put_slice(&moov);
    out.freeze()
}

/// Flag bit for a non-sync (non-keyframe) sample in `trun`'s `sample_flags`,
/// per ISO/IEC 14496-12 8.8.3.1 (`sample_is_non_sync_sample`, bit 16).
pub const SAMPLE_FLAG_NON_SYNC: u32 = 0x0001_0000;

/// One encoded access unit to be written into a `trun` box / `mdat`.
#[derive(Debug, Clone)]
pub struct TrackSample {
    pub data: Bytes,
    pub duration: u32,
    pub flags: u32,
    pub composition_time_offset: i32,
}

/// Build one media segment (`styp` + `moof` + `mdat`) for a single track.
///
/// `base_media_decode_time` is the track-timescale PTS of the first sample,
/// written into `tfdt` so segments can be appended independently of prior
/// fragment duration accounting (required when segments may be dropped or
/// re-fetched out of order by the passthrough cache).
pub fn build_media_segment(
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
    samples: &[TrackSample],
) -> Bytes {
    let styp_payload = {
        let mut p = Vec::new();
        p.extend_from_slice(b"msdh");
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(b"msdh");
        p.extend_from_slice(b"msix");
        p
    };
    let styp = build_box(b"styp", &styp_payload);

    let mfhd = build_full_box(b"mfhd", 0, 0, &sequence_number.to_be_bytes());

    let mut tfhd_payload = Vec::with_capacity(4);
    tfhd_payload.extend_from_slice(&track_id.to_be_bytes());
    // tfhd flags: default-base-is-moof
    let tfhd = build_full_box(b"tfhd", 0, 0x02_0000, &tfhd_payload);

    let mut tfdt_payload = Vec::with_capacity(8);
    tfdt_payload.extend_from_slice(&base_media_decode_time.to_be_bytes());
    let tfdt = build_full_box(b"tfdt", 1, 0, &tfdt_payload);

    // trun flags: data-offset | sample-duration | sample-size | sample-flags | composition-time-offset
    let trun_flags = 0x0001 | 0x0100 | 0x0200 | 0x0400 | 0x0800;
    let mut trun_payload = Vec::with_capacity(8 + samples.len() * 16);
    trun_payload.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    trun_payload.extend_from_slice(&0i32.to_be_bytes()); // data_offset placeholder
    for sample in samples {
        trun_payload.extend_from_slice(&sample.duration.to_be_bytes());
        trun_payload.extend_from_slice(&(sample.data.len() as u32).to_be_bytes());
        trun_payload.extend_from_slice(&sample.flags.to_be_bytes());
        trun_payload.extend_from_slice(&sample.composition_time_offset.to_be_bytes());
    }
    let mut trun = build_full_box(b"trun", 1, trun_flags, &trun_payload);

    let traf_body_len = tfhd.len() + tfdt.len() + trun.len();
    let traf_len = 8 + traf_body_len;
    let moof_len = 8 + mfhd.len() + traf_len;
    let data_offset = (moof_len + 8) as i32; // past moof, into mdat payload

    let trun_data_offset_pos = 8 /* box header */ + 4 /* fullbox version+flags */ + 4 /* sample_count */;
    trun[trun_data_offset_pos..trun_data_offset_pos + 4]
        .copy_from_slice(&data_offset.to_be_bytes());

    let mut traf_body = Vec::with_capacity(traf_body_len);
    traf_body.extend_from_slice(&tfhd);
    traf_body.extend_from_slice(&tfdt);
    traf_body.extend_from_slice(&trun);
    let traf = build_box(b"traf", &traf_body);

    let mut moof_body = Vec::with_capacity(mfhd.len() + traf.len());
    moof_body.extend_from_slice(&mfhd);
    moof_body.extend_from_slice(&traf);
    let moof = build_box(b"moof", &moof_body);

    let mdat_payload_len: usize = samples.iter().map(|s| s.data.len()).sum();
    let mut mdat_payload = Vec::with_capacity(mdat_payload_len);
    for sample in samples {
        mdat_payload.extend_from_slice(&sample.data);
    }
    let mdat = build_box(b"mdat", &mdat_payload);

    let mut out = BytesMut::with_capacity(styp.len() + moof.len() + mdat.len());
    out.put_slice(&styp);
    out.put_slice(&moof);
    out.put_slice(&mdat);
    out.freeze()
}
