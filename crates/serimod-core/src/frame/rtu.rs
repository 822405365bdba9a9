//! RTU framing: `<address><pdu...><crc16 LE>`, all binary, delimited by
//! inter-frame silence.

use crate::checksum;
use crate::encoding::Writer;
use crate::{DecodeError, EncodeError};

/// Encode a full RTU frame: address, PDU, little-endian CRC16 trailer.
pub fn encode_frame(w: &mut Writer<'_>, address: u8, pdu: &[u8]) -> Result<(), EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    let start = w.written();
    w.write_u8(address)?;
    w.write_all(pdu)?;
    let crc = checksum::crc16(&w.as_written()[start..]);
    w.write_all(&crc.to_le_bytes())
}

/// Validate the CRC trailer and return `(address, pdu)` with the CRC
/// stripped. Frames shorter than address + function + CRC are rejected.
pub fn decode_frame(frame: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if frame.len() < 4 {
        return Err(DecodeError::FrameTooShort);
    }
    if !checksum::verify_crc16(frame) {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok((frame[0], &frame[1..frame.len() - 2]))
}
