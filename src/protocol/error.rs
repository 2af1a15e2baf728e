use std::{io, time::Duration};

use thiserror::Error;

use crate::com::ComError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Framing,
    CrcMismatch,
    Timeout,
    BufferOverflow,
    Io,
    ProtocolViolation,
    Aborted,
}

#[derive(Debug, Error)]
pub enum TransmissionError {
    #[error("unexpected byte 0x{0:02X} while waiting for a frame start")]
    Framing(u8),
    #[error("crc16 mismatch got 0x{0:04X} expected 0x{1:04X}")]
    Crc16Mismatch(u16, u16),
    #[error("crc32 mismatch got 0x{0:08X} expected 0x{1:08X}")]
    Crc32Mismatch(u32, u32),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("subpacket exceeds {0} bytes")]
    BufferOverflow(usize),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("end of stream")]
    EndOfStream,
    #[error("{0}")]
    ProtocolViolation(String),
    #[error("packet id {id} doesn't match complement {complement}")]
    InvalidPacketId { id: u8, complement: u8 },
    #[error("invalid frame type {0}")]
    UnknownFrameType(u8),
    #[error("hex digit expected got 0x{0:02X}")]
    HexDigitExpected(u8),
    #[error("got ZDATA before ZFILE")]
    ZDataBeforeZFile,
    #[error("transfer canceled by the sender")]
    Cancelled,
    #[error("giving up after {0} retries")]
    TooManyRetries(u32),
}

impl TransmissionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransmissionError::Framing(_)
            | TransmissionError::UnknownFrameType(_)
            | TransmissionError::HexDigitExpected(_) => ErrorKind::Framing,
            TransmissionError::Crc16Mismatch(..) | TransmissionError::Crc32Mismatch(..) => ErrorKind::CrcMismatch,
            TransmissionError::Timeout(_) => ErrorKind::Timeout,
            TransmissionError::BufferOverflow(_) => ErrorKind::BufferOverflow,
            TransmissionError::Io(_) | TransmissionError::EndOfStream => ErrorKind::Io,
            TransmissionError::ProtocolViolation(_)
            | TransmissionError::InvalidPacketId { .. }
            | TransmissionError::ZDataBeforeZFile => ErrorKind::ProtocolViolation,
            TransmissionError::Cancelled | TransmissionError::TooManyRetries(_) => ErrorKind::Aborted,
        }
    }

    /// Recoverable errors are answered locally (resync, NAK, ZRPOS),
    /// everything else ends the session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TransmissionError::Io(_)
                | TransmissionError::EndOfStream
                | TransmissionError::Cancelled
                | TransmissionError::TooManyRetries(_)
        )
    }
}

impl From<ComError> for TransmissionError {
    fn from(err: ComError) -> Self {
        match err {
            ComError::Timeout(t) => TransmissionError::Timeout(t),
            ComError::Eof => TransmissionError::EndOfStream,
            ComError::Io(err) => TransmissionError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_com_errors_keep_their_identity() {
        let t = Duration::from_secs(3);
        assert_eq!(ErrorKind::Timeout, TransmissionError::from(ComError::Timeout(t)).kind());
        assert!(matches!(TransmissionError::from(ComError::Eof), TransmissionError::EndOfStream));
        let io = TransmissionError::from(ComError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
        assert_eq!(ErrorKind::Io, io.kind());
        assert!(!io.is_recoverable());
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(TransmissionError::Crc16Mismatch(1, 2).is_recoverable());
        assert!(TransmissionError::BufferOverflow(8192).is_recoverable());
        assert!(TransmissionError::InvalidPacketId { id: 1, complement: 1 }.is_recoverable());
        assert!(TransmissionError::ZDataBeforeZFile.is_recoverable());
        assert!(!TransmissionError::TooManyRetries(20).is_recoverable());
        assert!(!TransmissionError::Cancelled.is_recoverable());
    }
}
