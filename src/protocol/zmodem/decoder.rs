use std::time::Duration;

use crate::{
    com::Com,
    protocol::{
        crc::{crc16_zmodem, crc32_ieee},
        BoundedBuffer, TransmissionError,
    },
};

use super::{
    decode_escaped_byte, from_hex, DecodedByte, Frame, FrameEncoding, FrameType, CAN_ABORT_COUNT, CR, CR_0X80, LF,
    LF_0X80, XON, ZDLE, ZPAD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Init,
    WaitZpad,
    WaitZdle,
    WaitHeaderType,
    WaitFrameType,
    Done,
    Error,
}

/// Byte driven ZMODEM header recognizer.
///
/// Feed it bytes with [`FrameDecoder::push`] until it yields a [`Frame`].
/// Garbage between headers is skipped, a damaged header is reported once and
/// the decoder goes back to hunting for the next ZPAD on its own.
#[derive(Debug)]
pub struct FrameDecoder {
    state: ReceiverState,
    encoding: FrameEncoding,
    buf: BoundedBuffer,
    escape_next: bool,
    can_count: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Longest header as received: 14 hex digits.
    const HEADER_BUFFER_LEN: usize = 14;

    pub fn new() -> Self {
        Self {
            state: ReceiverState::Init,
            encoding: FrameEncoding::Hex,
            buf: BoundedBuffer::new(Self::HEADER_BUFFER_LEN),
            escape_next: false,
            can_count: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Starts looking for the next header.
    pub fn reset(&mut self) {
        self.state = ReceiverState::WaitZpad;
        self.clear();
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.escape_next = false;
    }

    /// Reads from `com` until a complete header arrived.
    pub fn read_frame(&mut self, com: &mut dyn Com, timeout: Duration) -> Result<Frame, TransmissionError> {
        loop {
            let c = match com.read_u8(timeout) {
                Ok(c) => c,
                Err(err) => {
                    let err = TransmissionError::from(err);
                    if matches!(err, TransmissionError::Timeout(_)) {
                        self.reset();
                    } else {
                        self.state = ReceiverState::Error;
                        self.clear();
                    }
                    return Err(err);
                }
            };
            if let Some(frame) = self.push(c)? {
                return Ok(frame);
            }
        }
    }

    pub fn push(&mut self, c: u8) -> Result<Option<Frame>, TransmissionError> {
        if c == ZDLE {
            self.can_count += 1;
            if self.can_count >= CAN_ABORT_COUNT {
                self.can_count = 0;
                self.reset();
                return Err(TransmissionError::Cancelled);
            }
        } else {
            self.can_count = 0;
        }

        match self.state {
            ReceiverState::Init | ReceiverState::WaitZpad | ReceiverState::Done | ReceiverState::Error => {
                if c == ZPAD {
                    self.state = ReceiverState::WaitZdle;
                }
            }
            ReceiverState::WaitZdle => match c {
                ZDLE => self.state = ReceiverState::WaitHeaderType,
                ZPAD => {}
                _ => self.state = ReceiverState::WaitZpad,
            },
            ReceiverState::WaitHeaderType => match FrameEncoding::from_indicator(c) {
                Some(encoding) => {
                    self.encoding = encoding;
                    self.clear();
                    self.state = ReceiverState::WaitFrameType;
                }
                None => {
                    self.state = ReceiverState::WaitZpad;
                    return Err(TransmissionError::Framing(c));
                }
            },
            ReceiverState::WaitFrameType => {
                return match self.encoding {
                    FrameEncoding::Hex => self.push_hex(c),
                    FrameEncoding::Bin16 | FrameEncoding::Bin32 => self.push_bin(c),
                };
            }
        }
        Ok(None)
    }

    fn push_hex(&mut self, c: u8) -> Result<Option<Frame>, TransmissionError> {
        if matches!(c, CR | LF | XON | CR_0X80 | LF_0X80) {
            return Ok(None);
        }
        if let Err(err) = from_hex(c) {
            self.clear();
            self.state = if c == ZPAD {
                ReceiverState::WaitZdle
            } else {
                ReceiverState::WaitZpad
            };
            return Err(err);
        }
        self.buf.push(c)?;
        if !self.buf.is_full() {
            return Ok(None);
        }

        let mut raw = [0u8; 7];
        for (i, pair) in self.buf.chunks(2).enumerate() {
            raw[i] = from_hex(pair[0])? << 4 | from_hex(pair[1])?;
        }
        self.finish(&raw)
    }

    fn push_bin(&mut self, c: u8) -> Result<Option<Frame>, TransmissionError> {
        let decoded = decode_escaped_byte(self.escape_next, c);
        self.escape_next = decoded == DecodedByte::Escape;
        if let Some(b) = decoded.data() {
            self.buf.push(b)?;
        }
        if self.buf.len() < self.encoding.header_len() {
            return Ok(None);
        }
        let raw = self.buf.to_vec();
        self.finish(&raw)
    }

    /// Checks the CRC of a complete header and resolves the decoder state.
    fn finish(&mut self, raw: &[u8]) -> Result<Option<Frame>, TransmissionError> {
        self.clear();
        self.state = ReceiverState::WaitZpad;

        let header = &raw[..5];
        match self.encoding {
            FrameEncoding::Hex | FrameEncoding::Bin16 => {
                let crc = crc16_zmodem(header);
                let check_crc = u16::from_be_bytes([raw[5], raw[6]]);
                if crc != check_crc {
                    return Err(TransmissionError::Crc16Mismatch(check_crc, crc));
                }
            }
            FrameEncoding::Bin32 => {
                let crc = crc32_ieee(header);
                let check_crc = u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]);
                if crc != check_crc {
                    return Err(TransmissionError::Crc32Mismatch(check_crc, crc));
                }
            }
        }

        let frame_type = FrameType::try_from(header[0])?;
        self.state = ReceiverState::Done;
        let frame = Frame {
            frame_type,
            encoding: self.encoding,
            flags: [header[1], header[2], header[3], header[4]],
        };
        log::debug!("got header: {frame}");
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::com::TestCom;

    fn feed(decoder: &mut FrameDecoder, data: &[u8]) -> Vec<Result<Frame, TransmissionError>> {
        let mut res = Vec::new();
        for &c in data {
            match decoder.push(c) {
                Ok(Some(frame)) => res.push(Ok(frame)),
                Ok(None) => {}
                Err(err) => res.push(Err(err)),
            }
        }
        res
    }

    #[test]
    fn test_hex_zrinit() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(ReceiverState::Init, decoder.state());
        let res = feed(&mut decoder, b"**\x18B0100000000aa51");
        assert_eq!(1, res.len());
        let frame = res[0].as_ref().unwrap();
        assert_eq!(FrameType::RInit, frame.frame_type);
        assert_eq!(FrameEncoding::Hex, frame.encoding);
        assert_eq!([0, 0, 0, 0], frame.flags);
        assert_eq!(ReceiverState::Done, decoder.state());
    }

    #[test]
    fn test_corrupted_crc_resyncs() {
        let mut decoder = FrameDecoder::new();
        let res = feed(&mut decoder, b"**\x18B0100000000aa52");
        assert_eq!(1, res.len());
        assert_matches!(res[0], Err(TransmissionError::Crc16Mismatch(0xaa52, 0xaa51)));
        assert_eq!(ReceiverState::WaitZpad, decoder.state());

        // no reset needed for the next header
        let res = feed(&mut decoder, b"\r\n\x11**\x18B0100000000aa51\r\n\x11");
        assert_eq!(1, res.len());
        assert_eq!(FrameType::RInit, res[0].as_ref().unwrap().frame_type);
    }

    #[test]
    fn test_all_encodings() {
        for encoding in [FrameEncoding::Hex, FrameEncoding::Bin16, FrameEncoding::Bin32] {
            let sent = Frame::from_number(FrameType::Data, 0x1813_0011).with_encoding(encoding);
            let mut decoder = FrameDecoder::new();
            let res = feed(&mut decoder, &sent.build());
            assert_eq!(1, res.len(), "{encoding:?}");
            assert_eq!(&sent, res[0].as_ref().unwrap());
        }
    }

    #[test]
    fn test_bin32_crc_mismatch() {
        let mut data = Frame::from_number(FrameType::RPos, 100).with_encoding(FrameEncoding::Bin32).build();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        let mut decoder = FrameDecoder::new();
        let res = feed(&mut decoder, &data);
        assert_matches!(res[..], [Err(TransmissionError::Crc32Mismatch(..))]);
        assert_eq!(ReceiverState::WaitZpad, decoder.state());
    }

    #[test]
    fn test_garbage_and_padding_are_skipped() {
        let mut data = b"rz\r\x00garbage*x".to_vec();
        data.extend_from_slice(b"****");
        data.extend(Frame::empty(FrameType::RQInit).build()[1..].iter());
        let mut decoder = FrameDecoder::new();
        let res = feed(&mut decoder, &data);
        assert_eq!(1, res.len());
        assert_eq!(FrameType::RQInit, res[0].as_ref().unwrap().frame_type);
    }

    #[test]
    fn test_unknown_header_type_resyncs() {
        let mut decoder = FrameDecoder::new();
        let res = feed(&mut decoder, b"*\x18Z");
        assert_matches!(res[..], [Err(TransmissionError::Framing(b'Z'))]);
        assert_eq!(ReceiverState::WaitZpad, decoder.state());
    }

    #[test]
    fn test_truncated_hex_header() {
        let mut data = b"**\x18B0100".to_vec();
        data.extend(Frame::empty(FrameType::Fin).build());
        let mut decoder = FrameDecoder::new();
        let res = feed(&mut decoder, &data);
        assert_eq!(2, res.len());
        assert_matches!(res[0], Err(TransmissionError::HexDigitExpected(b'*')));
        assert_eq!(FrameType::Fin, res[1].as_ref().unwrap().frame_type);
    }

    #[test]
    fn test_unknown_frame_type() {
        let raw = [0x14, 0, 0, 0, 0];
        let crc = crc16_zmodem(&raw).to_be_bytes();
        let mut data = b"**\x18B".to_vec();
        for b in raw.iter().chain(crc.iter()) {
            data.extend_from_slice(format!("{b:02x}").as_bytes());
        }
        let mut decoder = FrameDecoder::new();
        let res = feed(&mut decoder, &data);
        assert_matches!(res[..], [Err(TransmissionError::UnknownFrameType(0x14))]);
        assert_eq!(ReceiverState::WaitZpad, decoder.state());
    }

    #[test]
    fn test_can_sequence_aborts() {
        let mut decoder = FrameDecoder::new();
        let res = feed(&mut decoder, &[0x18; 8]);
        assert_matches!(res[..], [Err(TransmissionError::Cancelled)]);
    }

    #[test]
    fn test_read_frame_timeout_and_eof() {
        let mut com = TestCom::new();
        com.push_burst(b"**\x18B01".to_vec());
        let mut decoder = FrameDecoder::new();
        let t = Duration::from_millis(10);
        assert_matches!(decoder.read_frame(&mut com, t), Err(TransmissionError::Timeout(_)));
        assert_eq!(ReceiverState::WaitZpad, decoder.state());

        com.eof_at_end = true;
        assert_matches!(decoder.read_frame(&mut com, t), Err(TransmissionError::EndOfStream));
        assert_eq!(ReceiverState::Error, decoder.state());

        com.push_burst(Frame::from_number(FrameType::Eof, 42).build());
        let frame = decoder.read_frame(&mut com, t).unwrap();
        assert_eq!(FrameType::Eof, frame.frame_type);
        assert_eq!(42, frame.number());
    }
}
