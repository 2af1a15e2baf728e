use super::{ZCRCE, ZCRCG, ZCRCQ, ZCRCW, ZDLE, ZRUB0, ZRUB1};

/// The four ZDLE sequences that end a data subpacket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// ZCRCE: frame ends, header follows
    Crce,
    /// ZCRCG: frame continues nonstop
    Crcg,
    /// ZCRCQ: frame continues, ZACK expected
    Crcq,
    /// ZCRCW: frame ends, ZACK expected
    Crcw,
}

impl FrameEnd {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            ZCRCE => Some(FrameEnd::Crce),
            ZCRCG => Some(FrameEnd::Crcg),
            ZCRCQ => Some(FrameEnd::Crcq),
            ZCRCW => Some(FrameEnd::Crcw),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            FrameEnd::Crce => ZCRCE,
            FrameEnd::Crcg => ZCRCG,
            FrameEnd::Crcq => ZCRCQ,
            FrameEnd::Crcw => ZCRCW,
        }
    }

    pub fn frame_ends(self) -> bool {
        matches!(self, FrameEnd::Crce | FrameEnd::Crcw)
    }

    pub fn zack_requested(self) -> bool {
        matches!(self, FrameEnd::Crcq | FrameEnd::Crcw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedByte {
    /// Plain data byte.
    Literal(u8),
    /// ZDLE, the next byte is escaped.
    Escape,
    /// The byte after a ZDLE, restored.
    Unescaped(u8),
    /// ZDLE followed by a subpacket terminator.
    FrameEnd(FrameEnd),
}

impl DecodedByte {
    /// The data byte, if any. Terminators read back as their raw value, that's
    /// what a header or CRC field contains when it happens to hold one.
    pub fn data(self) -> Option<u8> {
        match self {
            DecodedByte::Literal(b) | DecodedByte::Unescaped(b) => Some(b),
            DecodedByte::FrameEnd(end) => Some(end.as_byte()),
            DecodedByte::Escape => None,
        }
    }
}

/// Decodes one byte of a ZDLE escaped stream.
///
/// `prev_was_dle` is true when the previous call returned [`DecodedByte::Escape`].
pub fn decode_escaped_byte(prev_was_dle: bool, c: u8) -> DecodedByte {
    if !prev_was_dle {
        return if c == ZDLE {
            DecodedByte::Escape
        } else {
            DecodedByte::Literal(c)
        };
    }
    if let Some(end) = FrameEnd::from_byte(c) {
        return DecodedByte::FrameEnd(end);
    }
    match c {
        ZRUB0 => DecodedByte::Unescaped(0x7F),
        ZRUB1 => DecodedByte::Unescaped(0xFF),
        c if c & 0x60 == 0x40 => DecodedByte::Unescaped(c ^ 0x40),
        c => DecodedByte::Unescaped(c),
    }
}

/// ZDLE encodes `data`, escaping every control character (and ZDLE itself).
pub fn encode_escaped(data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(data.len());
    for &b in data {
        if b & 0x60 == 0 {
            v.extend_from_slice(&[ZDLE, b ^ 0x40]);
        } else {
            v.push(b);
        }
    }
    v
}
