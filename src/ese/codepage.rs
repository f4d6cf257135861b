//! Windows code page to UTF-8 conversion.
//!
//! Text columns name their code page in the catalog; object names default
//! to Windows-1252. The engine decodes 1200/1201 (UTF-16 LE/BE), 20127
//! (ASCII), and 1252 exactly; other single-byte code pages fall back to
//! the 1252 table with a diagnostic, which is lossless for the ASCII
//! range that real-world object names occupy.

use crate::ese::constants::*;

/// The 0x80-0x9F range of Windows-1252, which diverges from ISO-8859-1.
/// `\u{FFFD}` marks the five unassigned bytes.
const WINDOWS_1252_80_9F: [char; 32] = [
    '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
    '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{FFFD}',
    '\u{017D}', '\u{FFFD}', '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
    '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
    '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}',
];

/// Decode `bytes` under `codepage` to a UTF-8 string.
///
/// Returns a description of the malformation on failure (odd UTF-16
/// length, unpaired surrogate, non-ASCII byte in an ASCII column).
pub fn decode(bytes: &[u8], codepage: u32) -> Result<String, String> {
    match codepage {
        CODEPAGE_UNICODE => decode_utf16(bytes, false),
        CODEPAGE_UNICODE_BE => decode_utf16(bytes, true),
        CODEPAGE_ASCII => decode_ascii(bytes),
        CODEPAGE_WINDOWS_1252 => Ok(decode_1252(bytes)),
        other => {
            log::debug!(
                "code page {} not tabled, decoding as windows-1252",
                other
            );
            Ok(decode_1252(bytes))
        }
    }
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> Result<String, String> {
    if bytes.len() % 2 != 0 {
        return Err(format!("UTF-16 value of odd length {}", bytes.len()));
    }
    let units = bytes.chunks_exact(2).map(|pair| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| format!("unpaired UTF-16 surrogate {:#06x}", e.unpaired_surrogate()))
}

fn decode_ascii(bytes: &[u8]) -> Result<String, String> {
    if let Some(bad) = bytes.iter().find(|&&b| b > 0x7F) {
        return Err(format!("non-ASCII byte {:#04x} in ASCII value", bad));
    }
    Ok(bytes.iter().map(|&b| b as char).collect())
}

fn decode_1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => WINDOWS_1252_80_9F[(b - 0x80) as usize],
            other => other as char,
        })
        .collect()
}
