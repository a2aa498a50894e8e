//! Character codec for the encodings an XML document may arrive in.
//!
//! Supports ASCII/UTF-8 and both endiannesses of UTF-16. Byte-order marks are
//! recognized by the parser's pre-document states; this module only decodes
//! and encodes individual characters.

/// Character encoding of a document being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// No byte-order mark and no declaration seen yet. Decoded as UTF-8,
    /// which covers ASCII documents and UTF-8 documents without a BOM.
    #[default]
    Unknown,
    /// UTF-8, detected from a BOM or an encoding declaration.
    Utf8,
    /// UTF-16 little-endian, detected from its BOM.
    Utf16Le,
    /// UTF-16 big-endian, detected from its BOM.
    Utf16Be,
}

impl Encoding {
    /// True for either UTF-16 variant.
    #[must_use]
    pub fn is_utf16(self) -> bool {
        matches!(self, Encoding::Utf16Le | Encoding::Utf16Be)
    }
}

/// Result of decoding one character from a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// One character and the number of input bytes it occupied.
    Char {
        /// The decoded character.
        c: char,
        /// Encoded length in bytes, in the `[1, 4]` range.
        len: usize,
    },
    /// The slice holds fewer bytes than the character needs. Not an error:
    /// the caller decides whether more input exists.
    Incomplete,
    /// The bytes cannot begin a valid character in this encoding.
    Invalid,
}

/// The UTF-8 byte-order mark.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
/// The UTF-16 big-endian byte-order mark.
pub const UTF16BE_BOM: [u8; 2] = [0xFE, 0xFF];
/// The UTF-16 little-endian byte-order mark.
pub const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];

/// Decode the first character of `bytes` under `encoding`.
#[must_use]
pub fn decode(bytes: &[u8], encoding: Encoding) -> Decoded {
    match encoding {
        Encoding::Unknown | Encoding::Utf8 => decode_utf8(bytes),
        Encoding::Utf16Be => decode_utf16(bytes, false),
        Encoding::Utf16Le => decode_utf16(bytes, true),
    }
}

fn decode_utf8(bytes: &[u8]) -> Decoded {
    let Some(&first) = bytes.first() else {
        return Decoded::Incomplete;
    };
    // The leading bits of the first byte give the sequence length:
    // 0xxxxxxx = 1, 110xxxxx = 2, 1110xxxx = 3, 11110xxx = 4.
    let len = match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return Decoded::Invalid,
    };
    if bytes.len() < len {
        return Decoded::Incomplete;
    }
    if len == 1 {
        return Decoded::Char {
            c: char::from(first),
            len: 1,
        };
    }
    let mut value = u32::from(first & (0x7F >> len));
    for &b in &bytes[1..len] {
        if b & 0xC0 != 0x80 {
            return Decoded::Invalid;
        }
        value = (value << 6) | u32::from(b & 0x3F);
    }
    match char::from_u32(value) {
        Some(c) => Decoded::Char { c, len },
        None => Decoded::Invalid,
    }
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> Decoded {
    if bytes.len() < 2 {
        return Decoded::Incomplete;
    }
    let unit = |hi: u8, lo: u8| (u16::from(hi) << 8) | u16::from(lo);
    let first = if little_endian {
        unit(bytes[1], bytes[0])
    } else {
        unit(bytes[0], bytes[1])
    };
    match first {
        // High surrogate: a four-byte sequence whose second unit must be a
        // low surrogate.
        0xD800..=0xDBFF => {
            if bytes.len() < 4 {
                return Decoded::Incomplete;
            }
            let second = if little_endian {
                unit(bytes[3], bytes[2])
            } else {
                unit(bytes[2], bytes[3])
            };
            if !(0xDC00..=0xDFFF).contains(&second) {
                return Decoded::Invalid;
            }
            let value = 0x10000
                + ((u32::from(first) - 0xD800) << 10)
                + (u32::from(second) - 0xDC00);
            match char::from_u32(value) {
                Some(c) => Decoded::Char { c, len: 4 },
                None => Decoded::Invalid,
            }
        }
        // A lone low surrogate cannot begin a character.
        0xDC00..=0xDFFF => Decoded::Invalid,
        _ => match char::from_u32(u32::from(first)) {
            Some(c) => Decoded::Char { c, len: 2 },
            None => Decoded::Invalid,
        },
    }
}

/// Encode `c` under `encoding`, returning the bytes and their count.
///
/// The inverse of [`decode`]; used when synthesizing characters from entity
/// and numeric references.
#[must_use]
pub fn encode(c: char, encoding: Encoding) -> ([u8; 4], usize) {
    let mut out = [0u8; 4];
    match encoding {
        Encoding::Unknown | Encoding::Utf8 => {
            let len = c.encode_utf8(&mut out).len();
            (out, len)
        }
        Encoding::Utf16Be | Encoding::Utf16Le => {
            let mut units = [0u16; 2];
            let units = c.encode_utf16(&mut units);
            let mut len = 0;
            for &unit in units.iter() {
                let [hi, lo] = unit.to_be_bytes();
                if encoding == Encoding::Utf16Le {
                    out[len] = lo;
                    out[len + 1] = hi;
                } else {
                    out[len] = hi;
                    out[len + 1] = lo;
                }
                len += 2;
            }
            (out, len)
        }
    }
}
