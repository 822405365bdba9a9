//! Hex<->binary conversion for ASCII-mode framing.
//!
//! Encoding always emits uppercase pairs. Decoding maps `'0'..='9'` and
//! `'A'..='F'`; any other input byte is silently treated as the nibble 0.
//! The lenient decode mirrors the wire behavior this engine was built
//! against and keeps the detector free of per-character error paths;
//! corrupted characters are caught downstream by the LRC check instead.

use crate::encoding::Writer;
use crate::EncodeError;

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Append one byte as two uppercase hex characters.
pub fn encode_byte(w: &mut Writer<'_>, byte: u8) -> Result<(), EncodeError> {
    w.write_u8(DIGITS[usize::from(byte >> 4)])?;
    w.write_u8(DIGITS[usize::from(byte & 0x0F)])
}

/// Append `data` as uppercase hex characters.
pub fn encode(w: &mut Writer<'_>, data: &[u8]) -> Result<(), EncodeError> {
    for byte in data {
        encode_byte(w, *byte)?;
    }
    Ok(())
}

fn nibble(chr: u8) -> u8 {
    match chr {
        b'0'..=b'9' => chr - b'0',
        b'A'..=b'F' => chr - b'A' + 0x0A,
        _ => 0,
    }
}

/// Decode hex characters to binary in place, returning the binary length.
///
/// Pairs are consumed left to right; a trailing unpaired character is
/// dropped. Never fails: invalid characters decode as 0.
pub fn decode_in_place(buf: &mut [u8]) -> usize {
    let pairs = buf.len() / 2;
    for i in 0..pairs {
        buf[i] = (nibble(buf[2 * i]) << 4) | nibble(buf[2 * i + 1]);
    }
    pairs
}
