//! CRC16 (RTU) and LRC8 (ASCII) checksums.

/// Modbus CRC16: polynomial 0xA001, seed 0xFFFF, bit-at-a-time.
///
/// Table-free on purpose; frame sizes on a serial link are small enough
/// that the lookup table is not worth its 512 bytes on embedded targets.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Recompute CRC16 over all but the last two bytes of `frame` and compare
/// against the little-endian trailer. Usable for any `frame` of length >= 2;
/// the check is independent of frame semantics.
pub fn verify_crc16(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let body = &frame[..frame.len() - 2];
    let got = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    crc16(body) == got
}

/// LRC8: two's complement of the byte sum.
pub fn lrc8(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

/// Recompute LRC8 over all but the last byte of `frame` and compare.
pub fn verify_lrc8(frame: &[u8]) -> bool {
    if frame.is_empty() {
        return false;
    }
    let body = &frame[..frame.len() - 1];
    lrc8(body) == frame[frame.len() - 1]
}
