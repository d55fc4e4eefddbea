use crate::{Result, TsError};

/// A single program entry in a Program Association Table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Owned Program Association Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    pub programs: Vec<PatProgram>,
}

impl Pat {
    /// Parse a PAT from a PSI section (starting at `table_id`, including CRC-32).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(TsError::InsufficientData {
                expected: 8,
                actual: data.len(),
            });
        }

        let table_id = data[0];
        if table_id != 0x00 {
            return Err(TsError::InvalidTableId {
                expected: 0x00,
                actual: table_id,
            });
        }

        let section_syntax_indicator = (data[1] & 0x80) != 0;
        if !section_syntax_indicator {
            return Err(TsError::ParseError(
                "PAT must have section syntax indicator set".to_string(),
            ));
        }

        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
        if section_length < 9 {
            return Err(TsError::InvalidSectionLength(section_length));
        }
        if data.len() < 3 + section_length as usize {
            return Err(TsError::InsufficientData {
                expected: 3 + section_length as usize,
                actual: data.len(),
            });
        }

        let transport_stream_id = u16::from_be_bytes([data[3], data[4]]);
        let version_number = (data[5] >> 1) & 0x1F;
        let current_next_indicator = (data[5] & 0x01) != 0;
        let section_number = data[6];
        let last_section_number = data[7];

        let programs_offset = 8;
        let programs_end = 3 + section_length as usize - 4; // exclude CRC-32
        let mut programs = Vec::with_capacity((programs_end.saturating_sub(programs_offset)) / 4);

        let mut offset = programs_offset;
        while offset + 4 <= programs_end {
            let program_number = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let pmt_pid = ((data[offset + 2] as u16 & 0x1F) << 8) | data[offset + 3] as u16;
            programs.push(PatProgram {
                program_number,
                pmt_pid,
            });
            offset += 4;
        }

        Ok(Pat {
            transport_stream_id,
            version_number,
            current_next_indicator,
            section_number,
            last_section_number,
            programs,
        })
    }

    /// Parse a PAT with CRC-32/MPEG-2 validation.
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

    fn build_pat_section(version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
        let section_length = 9 + programs.len() * 4;
        let mut section = Vec::with_capacity(3 + section_length);
        section.push(0x00);
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push((section_length & 0xFF) as u8);
        section.push(0x00);
        section.push(0x01);
        section.push(0xC0 | ((version & 0x1F) << 1) | 0x01);
        section.push(0x00);
        section.push(0x00);
        for &(program_number, pmt_pid) in programs {
            section.push((program_number >> 8) as u8);
            section.push((program_number & 0xFF) as u8);
            section.push(0xE0 | ((pmt_pid >> 8) as u8 & 0x1F));
            section.push((pmt_pid & 0xFF) as u8);
        }
        section.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // CRC placeholder
        section
    }

    #[test]
    fn test_parse_pat_single_program() {
        let section = build_pat_section(3, &[(1, 0x0100)]);
        let pat = Pat::parse(&section).unwrap();
        assert_eq!(pat.version_number, 3);
        assert_eq!(pat.programs.len(), 1);
        assert_eq!(pat.programs[0].program_number, 1);
        assert_eq!(pat.programs[0].pmt_pid, 0x0100);
    }

    #[test]
    fn test_parse_pat_invalid_table_id() {
        let mut section = build_pat_section(0, &[(1, 0x0100)]);
        section[0] = 0x02;
        assert!(matches!(
            Pat::parse(&section),
            Err(TsError::InvalidTableId { .. })
        ));
    }

    #[test]
    fn test_parse_pat_truncated() {
        let section = build_pat_section(0, &[(1, 0x0100)]);
        assert!(Pat::parse(&section[..5]).is_err());
    }
}
