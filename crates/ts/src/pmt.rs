use crate::{Result, TsError};

/// MPEG-TS stream_type values (ISO/IEC 13818-1 Table 2-34), plus the
/// registration-descriptor-qualified private stream types this crate cares
/// about (AC-3/E-AC-3 are both nominally 0x06 "private" and disambiguated by
/// a registration or AC-3 descriptor upstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Mpeg1Video,
    Mpeg2Video,
    Mpeg1Audio,
    Mpeg2Audio,
    PrivateSection,
    PrivateData,
    Aac,
    Mpeg4Video,
    LatmAac,
    H264,
    Hevc,
    Ac3,
    Eac3,
    Unknown(u8),
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => StreamType::Mpeg1Video,
            0x02 => StreamType::Mpeg2Video,
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x05 => StreamType::PrivateSection,
            0x06 => StreamType::PrivateData,
            0x0F => StreamType::Aac,
            0x10 => StreamType::Mpeg4Video,
            0x11 => StreamType::LatmAac,
            0x1B => StreamType::H264,
            0x24 => StreamType::Hevc,
            0x81 => StreamType::Ac3,
            0x87 => StreamType::Eac3,
            v => StreamType::Unknown(v),
        }
    }
}

impl StreamType {
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Video | StreamType::Mpeg2Video | StreamType::Mpeg4Video
                | StreamType::H264
                | StreamType::Hevc
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Audio
                | StreamType::Mpeg2Audio
                | StreamType::Aac
                | StreamType::LatmAac
                | StreamType::Ac3
                | StreamType::Eac3
        )
    }
}

/// One elementary stream entry in a Program Map Table.
#[derive(Debug, Clone)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
    pub es_info: Vec<u8>,
}

/// Owned Program Map Table.
#[derive(Debug, Clone)]
pub struct Pmt {
    pub program_number: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub pcr_pid: u16,
    pub program_info: Vec<u8>,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    /// Parse a PMT from a PSI section (starting at `table_id`, including CRC-32).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(TsError::InsufficientData {
                expected: 12,
                actual: data.len(),
            });
        }

        let table_id = data[0];
        if table_id != 0x02 {
            return Err(TsError::InvalidTableId {
                expected: 0x02,
                actual: table_id,
            });
        }

        let section_syntax_indicator = (data[1] & 0x80) != 0;
        if !section_syntax_indicator {
            return Err(TsError::ParseError(
                "PMT must have section syntax indicator set".to_string(),
            ));
        }

        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
        if section_length < 13 {
            return Err(TsError::InvalidSectionLength(section_length));
        }
        if data.len() < 3 + section_length as usize {
            return Err(TsError::InsufficientData {
                expected: 3 + section_length as usize,
                actual: data.len(),
            });
        }

        let program_number = u16::from_be_bytes([data[3], data[4]]);
        let version_number = (data[5] >> 1) & 0x1F;
        let current_next_indicator = (data[5] & 0x01) != 0;
        let section_number = data[6];
        let last_section_number = data[7];
        let pcr_pid = ((data[8] as u16 & 0x1F) << 8) | data[9] as u16;

        let program_info_length = ((data[10] as u16 & 0x0F) << 8) | data[11] as u16;
        let program_info_length = program_info_length as usize;

        if (section_length as usize) < 9 + program_info_length + 4 {
            return Err(TsError::InvalidSectionLength(section_length));
        }

        let program_info_offset = 12;
        let program_info_end = program_info_offset + program_info_length;
        if program_info_end > data.len() {
            return Err(TsError::InsufficientData {
                expected: program_info_end,
                actual: data.len(),
            });
        }
        let program_info = data[program_info_offset..program_info_end].to_vec();

        let streams_offset = program_info_end;
        let streams_end = 3 + section_length as usize - 4; // exclude CRC-32
        let mut streams = Vec::new();
        let mut offset = streams_offset;

        while offset + 5 <= streams_end {
            let stream_type = StreamType::from(data[offset]);
            let elementary_pid = ((data[offset + 1] as u16 & 0x1F) << 8) | data[offset + 2] as u16;
            let es_info_length = ((data[offset + 3] as u16 & 0x0F) << 8) | data[offset + 4] as u16;
            let es_info_length = es_info_length as usize;
            let es_info_start = offset + 5;
            let es_info_end = es_info_start + es_info_length;

            if es_info_end > streams_end {
                return Err(TsError::InsufficientData {
                    expected: es_info_end,
                    actual: streams_end,
                });
            }

            streams.push(PmtStream {
                stream_type,
                elementary_pid,
                es_info: data[es_info_start..es_info_end].to_vec(),
            });

            offset = es_info_end;
        }

        Ok(Pmt {
            program_number,
            version_number,
            current_next_indicator,
            section_number,
            last_section_number,
            pcr_pid,
            program_info,
            streams,
        })
    }

    /// Parse a PMT with CRC-32/MPEG-2 validation.
    pub fn parse_with_crc(data: &[u8]) -> Result<Self> {
        if data.len() >= 7 {
            let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
            let section_end = 3 + section_length as usize;
            if section_end <= data.len()
                && section_end >= 4
                && !crate::crc32::validate_section_crc32(&data[..section_end])
            {
                let stored = u32::from_be_bytes([
                    data[section_end - 4],
                    data[section_end - 3],
                    data[section_end - 2],
                    data[section_end - 1],
                ]);
                let calculated = crate::crc32::mpeg2_crc32(&data[..section_end - 4]);
                return Err(TsError::Crc32Mismatch {
                    expected: stored,
                    calculated,
                });
            }
        }
        Self::parse(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pmt_section(program_number: u16, pcr_pid: u16, streams: &[(u8, u16)]) -> Vec<u8> {
        let section_length = 13 + streams.len() * 5;
        let mut section = Vec::with_capacity(3 + section_length);
        section.push(0x02);
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push((section_length & 0xFF) as u8);
        section.push((program_number >> 8) as u8);
        section.push((program_number & 0xFF) as u8);
        section.push(0xC1);
        section.push(0x00);
        section.push(0x00);
        section.push(0xE0 | ((pcr_pid >> 8) as u8 & 0x1F));
        section.push((pcr_pid & 0xFF) as u8);
        section.push(0xF0);
        section.push(0x00);
        for &(stream_type, pid) in streams {
            section.push(stream_type);
            section.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
            section.push((pid & 0xFF) as u8);
            section.push(0xF0);
            section.push(0x00);
        }
        section.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        section
    }

    #[test]
    fn test_parse_pmt_with_streams() {
        let section = build_pmt_section(1, 0x0101, &[(0x1B, 0x0101), (0x0F, 0x0102)]);
        let pmt = Pmt::parse(&section).unwrap();
        assert_eq!(pmt.program_number, 1);
        assert_eq!(pmt.pcr_pid, 0x0101);
        assert_eq!(pmt.streams.len(), 2);
        assert!(pmt.streams[0].stream_type.is_video());
        assert!(pmt.streams[1].stream_type.is_audio());
    }

    #[test]
    fn test_parse_pmt_invalid_table_id() {
        let mut section = build_pmt_section(1, 0x0101, &[]);
        section[0] = 0x00;
        assert!(matches!(
            Pmt::parse(&section),
            Err(TsError::InvalidTableId { .. })
        ));
    }

    #[test]
    fn test_stream_type_from_u8() {
        assert_eq!(StreamType::from(0x1B), StreamType::H264);
        assert_eq!(StreamType::from(0x24), StreamType::Hevc);
        assert!(matches!(StreamType::from(0xEE), StreamType::Unknown(0xEE)));
    }
}
