//! Reassembles PES access units from a raw TS byte stream: the read-side
//! counterpart to [`crate::mux`]. Tracks PAT/PMT just enough to map
//! elementary PIDs to stream types, then buffers each PID's payload
//! between `payload_unit_start_indicator` packets and parses the
//! completed PES packet once the next one starts.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::packet::{PID_PAT, TsPacket};
use crate::pat::Pat;
use crate::pes::PesHeaderRef;
use crate::pmt::{Pmt, StreamType};

pub const TS_PACKET_SIZE: usize = 188;

/// One demuxed elementary stream access unit.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub pid: u16,
    pub stream_type: StreamType,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Set when any TS packet carrying this access unit had the
    /// adaptation field's random_access_indicator bit set.
    pub keyframe: bool,
    pub data: Bytes,
}

impl AccessUnit {
    pub fn is_video(&self) -> bool {
        self.stream_type.is_video()
    }

    pub fn is_audio(&self) -> bool {
        self.stream_type.is_audio()
    }
}

struct PesAssembly {
    buffer: BytesMut,
    keyframe: bool,
    stream_type: StreamType,
}

/// Streaming TS demuxer. Feed it raw bytes via [`TsDemuxer::push`]; it
/// returns completed access units as soon as enough of the stream has
/// arrived to know they're finished (i.e. the next PES packet on that
/// PID has started).
#[derive(Default)]
pub struct TsDemuxer {
    pat: Option<Pat>,
    pmts: HashMap<u16, Pmt>,
    elementary_pids: HashMap<u16, StreamType>,
    assemblies: HashMap<u16, PesAssembly>,
    leftover: BytesMut,
}

impl TsDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<AccessUnit> {
        self.leftover.extend_from_slice(data);
        let mut out = Vec::new();

        while self.leftover.len() >= TS_PACKET_SIZE {
            let packet_bytes = self.leftover.split_to(TS_PACKET_SIZE).freeze();
            let Ok(packet) = TsPacket::parse(packet_bytes) else {
                continue;
            };
            self.handle_packet(packet, &mut out);
        }
        out
    }

    /// Elementary PIDs and their stream types discovered from the PMT so
    /// far, in PMT stream order.
    pub fn known_streams(&self) -> Vec<(u16, StreamType)> {
        self.elementary_pids.iter().map(|(&pid, &st)| (pid, st)).collect()
    }

    /// Flushes any access unit still buffered (the stream ended without a
    /// trailing payload-start packet to signal completion).
    pub fn flush(&mut self) -> Vec<AccessUnit> {
        self.assemblies
            .drain()
            .filter_map(|(pid, assembly)| finish_assembly(pid, assembly))
            .collect()
    }

    fn handle_packet(&mut self, packet: TsPacket, out: &mut Vec<AccessUnit>) {
        if packet.pid == PID_PAT {
            if let Some(payload) = packet.get_psi_payload() {
                if let Ok(pat) = Pat::parse(&payload) {
                    self.pat = Some(pat);
                }
            }
            return;
        }

        if let Some(pat) = &self.pat {
            if pat.programs.iter().any(|p| p.pmt_pid == packet.pid) {
                if let Some(payload) = packet.get_psi_payload() {
                    if let Ok(pmt) = Pmt::parse(&payload) {
                        for stream in &pmt.streams {
                            self.elementary_pids.insert(stream.elementary_pid, stream.stream_type);
                        }
                        self.pmts.insert(pmt.program_number, pmt);
                    }
                }
                return;
            }
        }

        let Some(&stream_type) = self.elementary_pids.get(&packet.pid) else {
            return;
        };
        let Some(payload) = packet.payload.clone() else {
            return;
        };

        if packet.payload_unit_start_indicator {
            if let Some(assembly) = self.assemblies.remove(&packet.pid) {
                if let Some(unit) = finish_assembly(packet.pid, assembly) {
                    out.push(unit);
                }
            }
            self.assemblies.insert(
                packet.pid,
                PesAssembly {
                    buffer: BytesMut::from(payload.as_ref()),
                    keyframe: packet.has_random_access_indicator(),
                    stream_type,
                },
            );
        } else if let Some(assembly) = self.assemblies.get_mut(&packet.pid) {
            assembly.buffer.extend_from_slice(&payload);
            assembly.keyframe |= packet.has_random_access_indicator();
        }
    }
}

fn finish_assembly(pid: u16, assembly: PesAssembly) -> Option<AccessUnit> {
    let bytes = assembly.buffer.freeze();
    let header = PesHeaderRef::parse(bytes).ok()?;
    Some(AccessUnit {
        pid,
        stream_type: assembly.stream_type,
        pts: header.pts,
        dts: header.dts,
        keyframe: assembly.keyframe,
        data: header.payload(),
    })
}
