use std::time::Duration;

use crate::{
    com::Com,
    protocol::{crc::crc16_ccitt, TransmissionError},
};

use super::constants::{CAN, DEFAULT_BLOCK_LENGTH, EOT, EXT_BLOCK_LENGTH, SOH, STX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YmodemPacket {
    pub start: u8,
    pub id: u8,
    pub complement: u8,
    pub data: Vec<u8>,
    pub crc: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Eot,
    Data(YmodemPacket),
}

/// Reads the next packet.
///
/// Bytes in front of a start byte are skipped. The whole packet is consumed
/// before it is checked, so a rejected packet leaves the stream at the next
/// packet boundary.
pub fn read_packet(com: &mut dyn Com, timeout: Duration) -> Result<Packet, TransmissionError> {
    let mut last_was_can = false;
    let start = loop {
        let c = com.read_u8(timeout)?;
        match c {
            SOH | STX => break c,
            EOT => return Ok(Packet::Eot),
            CAN if last_was_can => return Err(TransmissionError::Cancelled),
            _ => log::trace!("skipping 0x{c:02X} before packet start"),
        }
        last_was_can = c == CAN;
    };
    let block_length = if start == SOH {
        DEFAULT_BLOCK_LENGTH
    } else {
        EXT_BLOCK_LENGTH
    };

    let mut block = com.read_exact(timeout, 2 + block_length + 2)?;
    let crc = u16::from_be_bytes([block[block_length + 2], block[block_length + 3]]);
    block.truncate(block_length + 2);
    let data = block.split_off(2);
    let packet = YmodemPacket {
        start,
        id: block[0],
        complement: block[1],
        data,
        crc,
    };

    if packet.id.wrapping_add(packet.complement) != 0xFF {
        return Err(TransmissionError::InvalidPacketId {
            id: packet.id,
            complement: packet.complement,
        });
    }
    let check_crc = crc16_ccitt(&packet.data);
    if check_crc != packet.crc {
        return Err(TransmissionError::Crc16Mismatch(packet.crc, check_crc));
    }
    log::debug!("got packet #{} ({} bytes)", packet.id, packet.data.len());
    Ok(Packet::Data(packet))
}

/// Builds a packet as a sender transmits it, `data` is padded with `pad`.
#[cfg(test)]
pub fn encode_packet(id: u8, data: &[u8], pad: u8) -> Vec<u8> {
    let (start, block_length) = if data.len() <= DEFAULT_BLOCK_LENGTH {
        (SOH, DEFAULT_BLOCK_LENGTH)
    } else {
        (STX, EXT_BLOCK_LENGTH)
    };
    let mut block = data.to_vec();
    block.resize(block_length, pad);

    let mut v = vec![start, id, 0xFF - id];
    v.extend_from_slice(&block);
    v.extend_from_slice(&crc16_ccitt(&block).to_be_bytes());
    v
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::com::TestCom;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_read_soh_packet() {
        let mut com = TestCom::new();
        com.push_burst(encode_packet(1, b"hello", 0x1A));
        let Packet::Data(packet) = read_packet(&mut com, TIMEOUT).unwrap() else {
            panic!("data packet expected");
        };
        assert_eq!(SOH, packet.start);
        assert_eq!(1, packet.id);
        assert_eq!(0xFE, packet.complement);
        assert_eq!(DEFAULT_BLOCK_LENGTH, packet.data.len());
        assert_eq!(b"hello", &packet.data[..5]);
        assert!(packet.data[5..].iter().all(|&b| b == 0x1A));
    }

    #[test]
    fn test_read_stx_packet() {
        let data = vec![0x55; 1000];
        let mut com = TestCom::new();
        com.push_burst(encode_packet(2, &data, 0));
        let Packet::Data(packet) = read_packet(&mut com, TIMEOUT).unwrap() else {
            panic!("data packet expected");
        };
        assert_eq!(STX, packet.start);
        assert_eq!(EXT_BLOCK_LENGTH, packet.data.len());
    }

    #[test]
    fn test_eot_and_leading_noise() {
        let mut com = TestCom::new();
        com.push_burst(vec![b'\r', b'x', EOT]);
        assert_eq!(Packet::Eot, read_packet(&mut com, TIMEOUT).unwrap());
    }

    #[test]
    fn test_bad_complement() {
        let mut wire = encode_packet(1, b"data", 0);
        wire[2] = 0xFD;
        let mut com = TestCom::new();
        com.push_burst(wire).push_burst(vec![EOT]);
        assert_matches!(
            read_packet(&mut com, TIMEOUT),
            Err(TransmissionError::InvalidPacketId { id: 1, complement: 0xFD })
        );
        // the rest of the packet was consumed
        assert_eq!(Packet::Eot, read_packet(&mut com, TIMEOUT).unwrap());
    }

    #[test]
    fn test_bad_crc() {
        let mut wire = encode_packet(1, b"data", 0);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        let mut com = TestCom::new();
        com.push_burst(wire);
        assert_matches!(read_packet(&mut com, TIMEOUT), Err(TransmissionError::Crc16Mismatch(..)));
    }

    #[test]
    fn test_truncated_packet_times_out() {
        let mut com = TestCom::new();
        com.push_burst(encode_packet(1, b"data", 0)[..50].to_vec());
        assert_matches!(read_packet(&mut com, TIMEOUT), Err(TransmissionError::Timeout(_)));
    }

    #[test]
    fn test_double_can_cancels() {
        let mut com = TestCom::new();
        com.push_burst(vec![CAN, CAN]);
        assert_matches!(read_packet(&mut com, TIMEOUT), Err(TransmissionError::Cancelled));

        com.push_burst(vec![CAN, b'x', CAN, EOT]);
        assert_eq!(Packet::Eot, read_packet(&mut com, TIMEOUT).unwrap());
    }
}
