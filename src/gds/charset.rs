//! Character sets negotiated with the server.
//!
//! Only the sets the driver core needs to move text through parameter
//! buffers and message slots are modelled. Everything else is rejected at
//! attach time by the server, not here.

use crate::error::{FbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    None,
    Octets,
    Ascii,
    UnicodeFss,
    #[default]
    Utf8,
    Iso8859_1,
    Win1252,
}

impl Charset {
    pub fn from_id(id: i32) -> Result<Self> {
        Ok(match id {
            0 => Charset::None,
            1 => Charset::Octets,
            2 => Charset::Ascii,
            3 => Charset::UnicodeFss,
            4 => Charset::Utf8,
            21 => Charset::Iso8859_1,
            53 => Charset::Win1252,
            other => {
                return Err(FbError::ConfigError(format!(
                    "unsupported character set id {}",
                    other
                )))
            }
        })
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name.to_ascii_uppercase().as_str() {
            "NONE" => Charset::None,
            "OCTETS" | "BINARY" => Charset::Octets,
            "ASCII" => Charset::Ascii,
            "UNICODE_FSS" => Charset::UnicodeFss,
            "UTF8" | "UTF-8" => Charset::Utf8,
            "ISO8859_1" | "LATIN1" => Charset::Iso8859_1,
            "WIN1252" => Charset::Win1252,
            other => {
                return Err(FbError::ConfigError(format!(
                    "unsupported character set {}",
                    other
                )))
            }
        })
    }

    pub fn id(self) -> i32 {
        match self {
            Charset::None => 0,
            Charset::Octets => 1,
            Charset::Ascii => 2,
            Charset::UnicodeFss => 3,
            Charset::Utf8 => 4,
            Charset::Iso8859_1 => 21,
            Charset::Win1252 => 53,
        }
    }

    /// Name sent as `lc_ctype` in the attach buffer.
    pub fn name(self) -> &'static str {
        match self {
            Charset::None => "NONE",
            Charset::Octets => "OCTETS",
            Charset::Ascii => "ASCII",
            Charset::UnicodeFss => "UNICODE_FSS",
            Charset::Utf8 => "UTF8",
            Charset::Iso8859_1 => "ISO8859_1",
            Charset::Win1252 => "WIN1252",
        }
    }

    pub fn bytes_per_character(self) -> usize {
        match self {
            Charset::Utf8 => 4,
            Charset::UnicodeFss => 3,
            _ => 1,
        }
    }

    pub fn is_octets(self) -> bool {
        self == Charset::Octets
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 | Charset::UnicodeFss | Charset::None | Charset::Octets => {
                text.as_bytes().to_vec()
            }
            // Single-byte sets: code points above the range become '?'
            Charset::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Charset::Iso8859_1 => text
                .chars()
                .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
                .collect(),
            Charset::Win1252 => text.chars().map(win1252_byte).collect(),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
            Charset::Win1252 => bytes.iter().map(|&b| win1252_char(b)).collect(),
            _ => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

// ============================================================================
// Code page 1252
// ============================================================================

/// Characters at 0x80..=0x9F. Unassigned positions (0x81, 0x8D, 0x8F,
/// 0x90, 0x9D) pass through as the matching C1 control.
const WIN1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

fn win1252_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => WIN1252_HIGH[(byte - 0x80) as usize],
        _ => byte as char,
    }
}

fn win1252_byte(c: char) -> u8 {
    let code = c as u32;
    if code < 0x80 || (0xA0..0x100).contains(&code) {
        return code as u8;
    }
    WIN1252_HIGH
        .iter()
        .position(|&high| high == c)
        .map_or(b'?', |i| 0x80 + i as u8)
}
