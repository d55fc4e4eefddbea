//! MPEG-TS muxing: the write-side counterpart to [`crate::parser_owned`] and
//! [`crate::parser_zero_copy`]. Builds PAT/PMT sections and PES-wrapped
//! elementary stream packets, then packetizes both into 188-byte TS packets
//! with continuity counters and adaptation-field PCR/stuffing.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc32::mpeg2_crc32;
use crate::packet::{PID_NULL, PID_PAT};
use crate::pes::{STREAM_ID_AUDIO_MIN, STREAM_ID_VIDEO_MIN};
use crate::pmt::StreamType;

const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const STUFFING_BYTE: u8 = 0xFF;

/// One elementary stream carried by the program this muxer writes.
#[derive(Debug, Clone, Copy)]
pub struct MuxStream {
    pub pid: u16,
    pub stream_type: StreamType,
}

/// Stateful MPEG-TS muxer for a single program.
///
/// Tracks per-PID continuity counters so repeated calls to
/// [`TsMuxer::write_pat_pmt`] / [`TsMuxer::write_es_frame`] produce a
/// contiguous, spec-compliant packet stream.
#[derive(Debug)]
pub struct TsMuxer {
    program_number: u16,
    pmt_pid: u16,
    pcr_pid: u16,
    streams: Vec<MuxStream>,
    continuity_counters: HashMap<u16, u8>,
    pat_version: u8,
    pmt_version: u8,
}

impl TsMuxer {
    pub fn new(program_number: u16, pmt_pid: u16, pcr_pid: u16, streams: Vec<MuxStream>) -> Self {
        Self {
            program_number,
            pmt_pid,
            pcr_pid,
            streams,
            continuity_counters: HashMap::new(),
            pat_version: 0,
            pmt_version: 0,
        }
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let entry = self.continuity_counters.entry(pid).or_insert(0);
        let current = *entry;
        *entry = (*entry + 1) & 0x0F;
        current
    }

    /// Build the PAT section (table_id 0x00) for this muxer's single program.
    fn build_pat_section(&self) -> Vec<u8> {
        let mut section = Vec::with_capacity(13);
        section.push(0x00); // table_id
        // section_length filled in after we know program count (always 1 here)
        let section_length = 9u16; // 5 header bytes past length field + 4 program bytes + 4 crc
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push((section_length & 0xFF) as u8);
        section.extend_from_slice(&1u16.to_be_bytes()); // transport_stream_id
        section.push(0xC0 | ((self.pat_version & 0x1F) << 1) | 0x01); // current_next=1
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.extend_from_slice(&self.program_number.to_be_bytes());
        section.push(0xE0 | ((self.pmt_pid >> 8) as u8 & 0x1F));
        section.push((self.pmt_pid & 0xFF) as u8);
        append_crc(&mut section);
        section
    }

    /// Build the PMT section (table_id 0x02) for this muxer's streams.
    fn build_pmt_section(&self) -> Vec<u8> {
        let stream_bytes = self.streams.len() * 5;
        let section_length = (13 + stream_bytes - 3) as u16; // bytes after the length field, including CRC

        let mut section = Vec::with_capacity(3 + section_length as usize);
        section.push(0x02); // table_id
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push((section_length & 0xFF) as u8);
        section.extend_from_slice(&self.program_number.to_be_bytes());
        section.push(0xC0 | ((self.pmt_version & 0x1F) << 1) | 0x01);
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.push(0xE0 | ((self.pcr_pid >> 8) as u8 & 0x1F));
        section.push((self.pcr_pid & 0xFF) as u8);
        section.push(0xF0); // program_info_length high nibble, reserved bits
        section.push(0x00); // program_info_length low byte (no descriptors)

        for stream in &self.streams {
            section.push(stream_type_to_byte(stream.stream_type));
            section.push(0xE0 | ((stream.pid >> 8) as u8 & 0x1F));
            section.push((stream.pid & 0xFF) as u8);
            section.push(0xF0);
            section.push(0x00); // es_info_length = 0
        }

        append_crc(&mut section);
        section
    }

    /// Emit TS packets carrying the current PAT and PMT. Callers should
    /// interleave these at a bounded interval (e.g. every 0.5s, or on every
    /// keyframe) so late-joining decoders can acquire the program quickly.
    pub fn write_pat_pmt(&mut self) -> Bytes {
        let pat_section = self.build_pat_section();
        let pmt_section = self.build_pmt_section();

        let pat_cc = self.next_cc(PID_PAT);
        let pmt_cc = self.next_cc(self.pmt_pid);

        let mut out = BytesMut::new();
        out.put(packetize_psi_section(PID_PAT, pat_cc, &pat_section));
        out.put(packetize_psi_section(self.pmt_pid, pmt_cc, &pmt_section));
        out.freeze()
    }

    /// `write_pat_pmt` followed by two null packets (PID 0x1FFF), so a
    /// client joining the stream always sees at least four packets before
    /// any elementary-stream payload — strict demuxers (e.g. VLC) need
    /// this many packets to validate sync before they'll start decoding.
    pub fn initial_tables(&mut self) -> Bytes {
        let mut out = BytesMut::new();
        out.put(self.write_pat_pmt());
        out.put_slice(&null_packet());
        out.put_slice(&null_packet());
        out.freeze()
    }

    /// Wrap one encoded access unit in a PES header and packetize it into TS
    /// packets for `pid`. `random_access` marks the first packet's adaptation
    /// field RAI bit (set on keyframes/sync samples); `pcr` carries a 27MHz
    /// program clock reference written into that same packet's adaptation
    /// field when `pid == self.pcr_pid`.
    pub fn write_es_frame(
        &mut self,
        pid: u16,
        is_video: bool,
        pts: u64,
        dts: Option<u64>,
        payload: &[u8],
        random_access: bool,
        pcr_27mhz: Option<u64>,
    ) -> Bytes {
        let stream_id = if is_video {
            STREAM_ID_VIDEO_MIN
        } else {
            STREAM_ID_AUDIO_MIN
        };

        let pes = build_pes_packet(stream_id, pts, dts, payload);
        let cc_start = self.continuity_counters.get(&pid).copied().unwrap_or(0);
        let carry_pcr = pcr_27mhz.filter(|_| pid == self.pcr_pid);

        let packets = packetize_pes(pid, cc_start, &pes, random_access, carry_pcr);
        let consumed = packets.len() / TS_PACKET_SIZE;
        let cc_entry = self.continuity_counters.entry(pid).or_insert(0);
        *cc_entry = ((*cc_entry as usize + consumed) & 0x0F) as u8;

        Bytes::from(packets)
    }
}

fn stream_type_to_byte(stream_type: StreamType) -> u8 {
    match stream_type {
        StreamType::Mpeg1Video => 0x01,
        StreamType::Mpeg2Video => 0x02,
        StreamType::Mpeg1Audio => 0x03,
        StreamType::Mpeg2Audio => 0x04,
        StreamType::PrivateSection => 0x05,
        StreamType::PrivateData => 0x06,
        StreamType::Aac => 0x0F,
        StreamType::Mpeg4Video => 0x10,
        StreamType::LatmAac => 0x11,
        StreamType::H264 => 0x1B,
        StreamType::Hevc => 0x24,
        StreamType::Ac3 => 0x81,
        StreamType::Eac3 => 0x87,
        StreamType::Unknown(v) => v,
    }
}

fn append_crc(section: &mut Vec<u8>) {
    let crc = mpeg2_crc32(section);
    section.extend_from_slice(&crc.to_be_bytes());
}

/// Encode a 33-bit PTS/DTS value with the given 4-bit marker prefix
/// (`0b0010` PTS-only, `0b0011` PTS-with-DTS, `0b0001` DTS), per ISO/IEC
/// 13818-1 2.4.3.6.
fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1,
        (ts >> 22) as u8,
        (((ts >> 15) as u8 & 0x7F) << 1) | 1,
        (ts >> 7) as u8,
        (((ts as u8) & 0x7F) << 1) | 1,
    ]
}

fn build_pes_packet(stream_id: u8, pts: u64, dts: Option<u64>, payload: &[u8]) -> Vec<u8> {
    let mut optional = Vec::with_capacity(14);
    let pts_dts_flags: u8 = if dts.is_some() { 0b11 } else { 0b10 };

    optional.push(0x80); // marker bits '10', no scrambling/priority/alignment/copyright
    optional.push((pts_dts_flags << 6) | 0x00); // no ESCR/ES_rate/trick-mode/etc.
    let header_data_length = if dts.is_some() { 10u8 } else { 5u8 };
    optional.push(header_data_length);

    optional.extend_from_slice(&encode_timestamp(if dts.is_some() { 0b0011 } else { 0b0010 }, pts));
    if let Some(dts) = dts {
        optional.extend_from_slice(&encode_timestamp(0b0001, dts));
    }

    let pes_packet_length_value = optional.len() + payload.len();
    let pes_packet_length = if pes_packet_length_value > 0xFFFF {
        0u16 // unbounded, permitted for video streams per spec
    } else {
        pes_packet_length_value as u16
    };

    let mut pes = Vec::with_capacity(6 + optional.len() + payload.len());
    pes.extend_from_slice(&[0x00, 0x00, 0x01]);
    pes.push(stream_id);
    pes.extend_from_slice(&pes_packet_length.to_be_bytes());
    pes.extend_from_slice(&optional);
    pes.extend_from_slice(payload);
    pes
}

/// A null packet (PID 0x1FFF): payload is stuffing, continuity counter is
/// not meaningful for this PID and is left at 0 per ISO/IEC 13818-1.
fn null_packet() -> [u8; TS_PACKET_SIZE] {
    let mut packet = [STUFFING_BYTE; TS_PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = (PID_NULL >> 8) as u8 & 0x1F;
    packet[2] = (PID_NULL & 0xFF) as u8;
    packet[3] = 0x10; // payload only, no adaptation field
    packet
}

/// Split a PSI section into 188-byte TS packets (pointer field + stuffing).
fn packetize_psi_section(pid: u16, mut cc: u8, section: &[u8]) -> BytesMut {
    let mut out = BytesMut::new();
    let mut remaining = {
        let mut buf = Vec::with_capacity(1 + section.len());
        buf.push(0x00); // pointer_field: section starts immediately
        buf.extend_from_slice(section);
        buf
    };
    let mut first = true;

    while !remaining.is_empty() {
        let mut packet = [0u8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = (if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = (pid & 0xFF) as u8;
        packet[3] = 0x10 | (cc & 0x0F); // payload only, no adaptation field
        cc = (cc + 1) & 0x0F;

        let take = remaining.len().min(184);
        packet[4..4 + take].copy_from_slice(&remaining[..take]);
        if take < 184 {
            packet[4 + take..].fill(STUFFING_BYTE);
        }
        remaining.drain(..take);

        out.put_slice(&packet);
        first = false;
    }

    out
}

/// Split a PES packet into 188-byte TS packets, writing an adaptation field
/// with RAI/PCR on the first packet when requested and stuffing the final
/// packet's adaptation field to pad it to 184 payload bytes.
fn packetize_pes(
    pid: u16,
    mut cc: u8,
    pes: &[u8],
    random_access: bool,
    pcr_27mhz: Option<u64>,
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut remaining = pes;
    let mut first = true;

    while !remaining.is_empty() {
        let mut packet = vec![0u8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = (if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = (pid & 0xFF) as u8;

        let adaptation_field = if first && (random_access || pcr_27mhz.is_some()) {
            Some(build_adaptation_field(random_access, pcr_27mhz, 0))
        } else {
            None
        };

        let header_len = 4 + adaptation_field.as_ref().map_or(0, |af| af.len());
        let available = TS_PACKET_SIZE - header_len;
        let take = remaining.len().min(available);

        // Last packet: pad with an adaptation field (stuffing) if payload
        // underfills the packet and we have no adaptation field yet.
        let needs_stuffing = take < available;
        let adaptation_field = if needs_stuffing && adaptation_field.is_none() {
            let stuffing_len = available - take;
            Some(build_adaptation_field(false, None, stuffing_len))
        } else if needs_stuffing {
            let mut af = adaptation_field.unwrap();
            extend_adaptation_field_stuffing(&mut af, available - take);
            Some(af)
        } else {
            adaptation_field
        };

        let adaptation_field_control: u8 = if adaptation_field.is_some() { 0x03 } else { 0x01 };
        packet[3] = (adaptation_field_control << 4) | (cc & 0x0F);
        cc = (cc + 1) & 0x0F;

        let mut offset = 4;
        if let Some(af) = &adaptation_field {
            packet[offset..offset + af.len()].copy_from_slice(af);
            offset += af.len();
        }

        let effective_take = TS_PACKET_SIZE - offset;
        let take = remaining.len().min(effective_take);
        packet[offset..offset + take].copy_from_slice(&remaining[..take]);
        remaining = &remaining[take..];

        out.extend_from_slice(&packet);
        first = false;
    }

    out
}

/// Build an adaptation field: `[length][flags]` plus optional PCR and
/// trailing stuffing bytes to reach `min_stuffing` extra bytes.
fn build_adaptation_field(random_access: bool, pcr_27mhz: Option<u64>, min_stuffing: usize) -> Vec<u8> {
    let mut flags = 0u8;
    if random_access {
        flags |= 0x40;
    }
    if pcr_27mhz.is_some() {
        flags |= 0x10;
    }

    let mut body = vec![flags];
    if let Some(pcr) = pcr_27mhz {
        body.extend_from_slice(&encode_pcr(pcr));
    }

    let mut af = Vec::with_capacity(1 + body.len() + min_stuffing);
    af.push(0); // length placeholder
    af.extend_from_slice(&body);
    af.resize(1 + body.len() + min_stuffing, STUFFING_BYTE);
    af[0] = (af.len() - 1) as u8;
    af
}

fn extend_adaptation_field_stuffing(af: &mut Vec<u8>, extra: usize) {
    af.resize(af.len() + extra, STUFFING_BYTE);
    af[0] = (af.len() - 1) as u8;
}

/// Encode a PCR value (27MHz ticks) into the 6-byte `[base:33][reserved:6][ext:9]` layout.
fn encode_pcr(pcr_27mhz: u64) -> [u8; 6] {
    let base = pcr_27mhz / 300;
    let extension = (pcr_27mhz % 300) as u16;

    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 0x01) as u8) << 7) | 0x7E | ((extension >> 8) as u8 & 0x01),
        (extension & 0xFF) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pat::Pat;
    use crate::pmt::Pmt;

    fn split_packets(data: &[u8]) -> Vec<&[u8]> {
        data.chunks(TS_PACKET_SIZE).collect()
    }

    #[test]
    fn test_write_pat_pmt_round_trips_through_parser() {
        let mut muxer = TsMuxer::new(
            1,
            0x1000,
            0x0100,
            vec![
                MuxStream {
                    pid: 0x0100,
                    stream_type: StreamType::H264,
                },
                MuxStream {
                    pid: 0x0101,
                    stream_type: StreamType::Aac,
                },
            ],
        );

        let data = muxer.write_pat_pmt();
        let packets = split_packets(&data);
        assert_eq!(packets.len(), 2);

        assert_eq!(packets[0][0], SYNC_BYTE);
        let pat_psi = &packets[0][5..]; // skip header(4) + pointer field(1)
        let pat = Pat::parse(pat_psi).unwrap();
        assert_eq!(pat.programs.len(), 1);
        assert_eq!(pat.programs[0].pmt_pid, 0x1000);

        let pmt_psi = &packets[1][5..];
        let pmt = Pmt::parse(pmt_psi).unwrap();
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.pcr_pid, 0x0100);
    }

    #[test]
    fn test_initial_tables_pads_to_four_packets_with_trailing_nulls() {
        let mut muxer = TsMuxer::new(
            1,
            0x1000,
            0x0100,
            vec![
                MuxStream {
                    pid: 0x0100,
                    stream_type: StreamType::H264,
                },
                MuxStream {
                    pid: 0x0101,
                    stream_type: StreamType::Aac,
                },
            ],
        );

        let data = muxer.initial_tables();
        assert_eq!(data.len(), TS_PACKET_SIZE * 4);

        let packets = split_packets(&data);
        assert_eq!(packets.len(), 4);
        for packet in &packets {
            assert_eq!(packet[0], SYNC_BYTE);
        }

        let pat_psi = &packets[0][5..];
        Pat::parse(pat_psi).unwrap();
        let pmt_psi = &packets[1][5..];
        Pmt::parse(pmt_psi).unwrap();

        for null_packet in &packets[2..4] {
            let pid = ((null_packet[1] as u16 & 0x1F) << 8) | null_packet[2] as u16;
            assert_eq!(pid, PID_NULL);
        }
    }

    #[test]
    fn test_write_es_frame_sets_random_access_indicator() {
        let mut muxer = TsMuxer::new(
            1,
            0x1000,
            0x0100,
            vec![MuxStream {
                pid: 0x0100,
                stream_type: StreamType::H264,
            }],
        );

        let payload = vec![0xAAu8; 10];
        let data = muxer.write_es_frame(0x0100, true, 90_000, None, &payload, true, Some(8_100_000_000));
        let packets = split_packets(&data);
        assert!(!packets.is_empty());

        let first = packets[0];
        assert_eq!(first[0], SYNC_BYTE);
        let adaptation_field_control = (first[3] >> 4) & 0x03;
        assert_eq!(adaptation_field_control, 0x03);
        let af_len = first[4] as usize;
        let flags = first[5];
        assert_ne!(flags & 0x40, 0, "random access indicator should be set");
        assert_ne!(flags & 0x10, 0, "PCR flag should be set");
        assert!(af_len >= 1 + 1 + 6);
    }

    #[test]
    fn test_write_es_frame_continuity_counter_increments() {
        let mut muxer = TsMuxer::new(
            1,
            0x1000,
            0x0100,
            vec![MuxStream {
                pid: 0x0100,
                stream_type: StreamType::H264,
            }],
        );

        let payload = vec![0xBBu8; 300]; // spans multiple TS packets
        let data = muxer.write_es_frame(0x0100, true, 0, None, &payload, false, None);
        let packets = split_packets(&data);
        assert!(packets.len() >= 2);

        let cc0 = packets[0][3] & 0x0F;
        let cc1 = packets[1][3] & 0x0F;
        assert_eq!(cc1, (cc0 + 1) & 0x0F);
    }

    #[test]
    fn test_encode_decode_timestamp_round_trip() {
        let ts = 123_456u64;
        let encoded = encode_timestamp(0b0010, ts);
        let decoded = crate::pes::PesHeader::parse(&{
            let mut data = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x80, 0x05];
            data.extend_from_slice(&encoded);
            data
        })
        .unwrap();
        assert_eq!(decoded.pts, Some(ts));
    }
}
