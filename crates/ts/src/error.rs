use thiserror::Error;

/// Errors that can occur while parsing or muxing MPEG-TS data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TsError {
    #[error("invalid packet size: expected 188 bytes, got {0}")]
    InvalidPacketSize(usize),

    #[error("invalid sync byte: expected 0x47, got {0:#04x}")]
    InvalidSyncByte(u8),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("invalid table id: expected {expected:#04x}, got {actual:#04x}")]
    InvalidTableId { expected: u8, actual: u8 },

    #[error("invalid section length: {0}")]
    InvalidSectionLength(u16),

    #[error("CRC-32/MPEG-2 mismatch: expected {expected:#010x}, calculated {calculated:#010x}")]
    Crc32Mismatch { expected: u32, calculated: u32 },

    #[error("continuity error on PID {pid:#06x}: expected counter {expected}, got {actual}")]
    ContinuityError { pid: u16, expected: u8, actual: u8 },

    #[error("duplicate packet on PID {pid:#06x} with counter {cc}")]
    DuplicatePacket { pid: u16, cc: u8 },

    #[error("invalid PES start code prefix, expected 0x000001")]
    InvalidPesStartCode,

    #[error("invalid PTS/DTS flags: {0:#04x}")]
    InvalidPtsDtsFlags(u8),

    #[error("parse error: {0}")]
    ParseError(String),
}
