use std::time::Duration;

use crate::{
    com::Com,
    protocol::{crc::crc16_zmodem_subpacket, BoundedBuffer, TransmissionError},
};

use super::{decode_escaped_byte, DecodedByte, FrameEnd, CAN_ABORT_COUNT, XOFF, XOFF_0X80, XON, XON_0X80, ZDLE};

/// Reads one data subpacket into `buf` and checks its CRC.
///
/// `buf` is cleared first, on success it holds the verified payload. Exceeding
/// the buffer capacity before a terminator shows up is an error.
pub fn read_subpacket(
    com: &mut dyn Com,
    buf: &mut BoundedBuffer,
    timeout: Duration,
) -> Result<FrameEnd, TransmissionError> {
    buf.clear();
    let mut escape_next = false;
    let mut can_count = 0;
    loop {
        let c = com.read_u8(timeout)?;
        if c == ZDLE {
            can_count += 1;
            if can_count >= CAN_ABORT_COUNT {
                return Err(TransmissionError::Cancelled);
            }
        } else {
            can_count = 0;
        }
        if !escape_next && matches!(c, XON | XON_0X80 | XOFF | XOFF_0X80) {
            continue;
        }

        let decoded = decode_escaped_byte(escape_next, c);
        escape_next = false;
        match decoded {
            DecodedByte::Escape => escape_next = true,
            DecodedByte::Literal(b) | DecodedByte::Unescaped(b) => buf.push(b)?,
            DecodedByte::FrameEnd(frame_end) => {
                let check_crc = u16::from_be_bytes([read_crc_byte(com, timeout)?, read_crc_byte(com, timeout)?]);
                let crc = crc16_zmodem_subpacket(&buf[..], frame_end.as_byte());
                if crc != check_crc {
                    return Err(TransmissionError::Crc16Mismatch(check_crc, crc));
                }
                log::trace!("subpacket {frame_end:?} with {} bytes", buf.len());
                return Ok(frame_end);
            }
        }
    }
}

fn read_crc_byte(com: &mut dyn Com, timeout: Duration) -> Result<u8, TransmissionError> {
    let mut escape_next = false;
    loop {
        let decoded = decode_escaped_byte(escape_next, com.read_u8(timeout)?);
        if let Some(b) = decoded.data() {
            return Ok(b);
        }
        escape_next = true;
    }
}

/// Builds a CRC-16 subpacket the way a sender transmits it.
#[cfg(test)]
pub fn encode_subpacket(frame_end: FrameEnd, data: &[u8]) -> Vec<u8> {
    let mut v = super::encode_escaped(data);
    v.extend_from_slice(&[ZDLE, frame_end.as_byte()]);
    let crc = crc16_zmodem_subpacket(data, frame_end.as_byte());
    v.extend(super::encode_escaped(&crc.to_be_bytes()));
    v
}
