use std::fmt::Display;

use crate::{
    com::{Com, ComResult},
    protocol::{
        crc::{crc16_zmodem, crc32_ieee},
        TransmissionError,
    },
};

use super::{encode_escaped, frame_types, CR, LF, XON, ZBIN, ZBIN32, ZDLE, ZHEX, ZPAD};

/// How a header travels on the wire.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum FrameEncoding {
    /// 14 hex digits, CRC-16
    Hex,
    /// ZDLE escaped binary, CRC-16
    Bin16,
    /// ZDLE escaped binary, CRC-32
    Bin32,
}

impl FrameEncoding {
    pub fn from_indicator(b: u8) -> Option<Self> {
        match b {
            ZHEX => Some(FrameEncoding::Hex),
            ZBIN => Some(FrameEncoding::Bin16),
            ZBIN32 => Some(FrameEncoding::Bin32),
            _ => None,
        }
    }

    /// Decoded header length: type, 4 flag bytes and the CRC.
    pub fn header_len(self) -> usize {
        match self {
            FrameEncoding::Hex | FrameEncoding::Bin16 => 7,
            FrameEncoding::Bin32 => 9,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum FrameType {
    /// Request receive init (s->r)
    RQInit = 0,
    /// Receive init (r->s)
    RInit = 1,
    /// Send init sequence (optional) (s->r)
    SInit = 2,
    /// ACK to RQInit, RInit or SInit (s<->r)
    Ack = 3,
    /// File name from sender (s->r)
    File = 4,
    /// To sender: skip this file (r->s)
    Skip = 5,
    /// Last packet was garbled
    Nak = 6,
    /// Abort batch transfers
    Abort = 7,
    /// Finish session (s<->r)
    Fin = 8,
    /// Resume data trans at this position (r->s)
    RPos = 9,
    /// Data packet(s) follow (s->r)
    Data = 10,
    /// End of file (s->r)
    Eof = 11,
    /// Fatal Read or Write error Detected
    FErr = 12,
    /// Request for file CRC and response
    Crc = 13,
    /// Request for free bytes on filesystem (s->r)
    FreeCnt = 17,
}

impl TryFrom<u8> for FrameType {
    type Error = TransmissionError;

    fn try_from(ftype: u8) -> Result<Self, Self::Error> {
        match ftype {
            frame_types::ZRQINIT => Ok(FrameType::RQInit),
            frame_types::ZRINIT => Ok(FrameType::RInit),
            frame_types::ZSINIT => Ok(FrameType::SInit),
            frame_types::ZACK => Ok(FrameType::Ack),
            frame_types::ZFILE => Ok(FrameType::File),
            frame_types::ZSKIP => Ok(FrameType::Skip),
            frame_types::ZNAK => Ok(FrameType::Nak),
            frame_types::ZABORT => Ok(FrameType::Abort),
            frame_types::ZFIN => Ok(FrameType::Fin),
            frame_types::ZRPOS => Ok(FrameType::RPos),
            frame_types::ZDATA => Ok(FrameType::Data),
            frame_types::ZEOF => Ok(FrameType::Eof),
            frame_types::ZFERR => Ok(FrameType::FErr),
            frame_types::ZCRC => Ok(FrameType::Crc),
            frame_types::ZFREECNT => Ok(FrameType::FreeCnt),
            _ => Err(TransmissionError::UnknownFrameType(ftype)),
        }
    }
}

/// A ZMODEM header.
///
/// `flags` is kept in wire order: `flags[0]` is ZF3 / the low byte of a
/// position (ZP0), `flags[3]` is ZF0 / the high byte (ZP3).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Frame {
    pub frame_type: FrameType,
    pub encoding: FrameEncoding,
    pub flags: [u8; 4],
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.frame_type {
            FrameType::RPos | FrameType::Eof | FrameType::FreeCnt | FrameType::Data | FrameType::Ack => {
                write!(f, "[{:?} {:?} number = {}]", self.encoding, self.frame_type, self.number())
            }
            _ => write!(
                f,
                "[{:?} {:?} flags = x{:02X}, x{:02X}, x{:02X}, x{:02X}]",
                self.encoding,
                self.frame_type,
                self.f3(),
                self.f2(),
                self.f1(),
                self.f0()
            ),
        }
    }
}

impl Frame {
    pub fn empty(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            encoding: FrameEncoding::Hex,
            flags: [0, 0, 0, 0],
        }
    }

    pub fn from_number(frame_type: FrameType, number: u32) -> Self {
        Self {
            frame_type,
            encoding: FrameEncoding::Hex,
            flags: u32::to_le_bytes(number),
        }
    }

    pub fn with_encoding(mut self, encoding: FrameEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn f0(&self) -> u8 {
        self.flags[3]
    }

    pub fn f1(&self) -> u8 {
        self.flags[2]
    }

    pub fn f2(&self) -> u8 {
        self.flags[1]
    }

    pub fn f3(&self) -> u8 {
        self.flags[0]
    }

    /// The flags read as little endian position.
    pub fn number(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    fn raw_header(&self) -> [u8; 5] {
        let [p0, p1, p2, p3] = self.flags;
        [self.frame_type as u8, p0, p1, p2, p3]
    }

    pub fn build(&self) -> Vec<u8> {
        let raw = self.raw_header();
        let mut res = Vec::new();

        match self.encoding {
            FrameEncoding::Hex => {
                res.extend_from_slice(&[ZPAD, ZPAD, ZDLE, ZHEX]);
                let crc16 = crc16_zmodem(&raw);
                for b in raw.iter().chain(crc16.to_be_bytes().iter()) {
                    res.push(get_hex(b >> 4));
                    res.push(get_hex(b & 0xF));
                }
                res.extend_from_slice(&[CR, LF, XON]);
            }
            FrameEncoding::Bin16 => {
                res.extend_from_slice(&[ZPAD, ZDLE, ZBIN]);
                res.extend(encode_escaped(&raw));
                res.extend(encode_escaped(&crc16_zmodem(&raw).to_be_bytes()));
            }
            FrameEncoding::Bin32 => {
                res.extend_from_slice(&[ZPAD, ZDLE, ZBIN32]);
                res.extend(encode_escaped(&raw));
                res.extend(encode_escaped(&crc32_ieee(&raw).to_le_bytes()));
            }
        }
        res
    }

    pub fn write(&self, com: &mut dyn Com) -> ComResult<()> {
        log::debug!("send header: {self}");
        com.send(&self.build())
    }
}

pub fn get_hex(n: u8) -> u8 {
    if n < 10 {
        b'0' + n
    } else {
        b'a' + (n - 10)
    }
}

pub fn from_hex(n: u8) -> Result<u8, TransmissionError> {
    match n {
        b'0'..=b'9' => Ok(n - b'0'),
        b'A'..=b'F' => Ok(10 + n - b'A'),
        b'a'..=b'f' => Ok(10 + n - b'a'),
        _ => Err(TransmissionError::HexDigitExpected(n)),
    }
}
