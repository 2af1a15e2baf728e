//! Checksums used on the wire.
//!
//! ZMODEM and YMODEM both use CRC-16 with polynomial 0x1021, initial value 0
//! and no final XOR (the XMODEM flavour of CRC-16/CCITT). They are exposed
//! under separate names so each protocol asks for its own checksum.

use crc16::{State, XMODEM};

/// CRC-16 of ZMODEM headers and data subpackets.
pub fn crc16_zmodem(data: &[u8]) -> u16 {
    State::<XMODEM>::calculate(data)
}

/// CRC-16 of a data subpacket: the payload followed by its terminator.
pub fn crc16_zmodem_subpacket(data: &[u8], frame_end: u8) -> u16 {
    let mut state = State::<XMODEM>::new();
    state.update(data);
    state.update(&[frame_end]);
    state.get()
}

/// CRC-16 trailer of YMODEM packets.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    State::<XMODEM>::calculate(data)
}

/// CRC-32 (IEEE 802.3) of BIN32 ZMODEM headers.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
