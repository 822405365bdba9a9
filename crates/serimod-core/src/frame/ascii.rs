//! ASCII framing: `':' <hex(address)> <hex(pdu...)> <hex(lrc)> '\r' '\n'`,
//! every body byte rendered as two uppercase hex characters and the body
//! (address through LRC) protected by an 8-bit two's-complement sum.

use crate::encoding::Writer;
use crate::{checksum, hex};
use crate::{DecodeError, EncodeError};

pub const START: u8 = b':';
pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';

/// Encode a full ASCII frame around `pdu`.
pub fn encode_frame(w: &mut Writer<'_>, address: u8, pdu: &[u8]) -> Result<(), EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    w.write_u8(START)?;
    hex::encode_byte(w, address)?;
    hex::encode(w, pdu)?;
    let mut lrc = address;
    for byte in pdu {
        lrc = lrc.wrapping_add(*byte);
    }
    hex::encode_byte(w, lrc.wrapping_neg())?;
    w.write_all(&[CR, LF])
}

/// Decode the hex body of a received frame (the characters between `':'`
/// and `'\r'`) to binary in place, verify the LRC, and return the payload
/// length with the checksum byte stripped. `buf[..len]` is then
/// `<address><function><data...>`.
pub fn decode_body_in_place(buf: &mut [u8]) -> Result<usize, DecodeError> {
    let bin_len = hex::decode_in_place(buf);
    // Shortest meaningful body: address, function, LRC.
    if bin_len < 3 {
        return Err(DecodeError::FrameTooShort);
    }
    if !checksum::verify_lrc8(&buf[..bin_len]) {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok(bin_len - 1)
}
