//! Typed PDUs for the three supported register operations.
//!
//! A PDU is the frame body without the leading device address and without
//! the mode-specific checksum: `<function><data...>`.

use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};

/// Protocol ceiling for one read request (not the per-instance limit).
pub const MAX_READ_REGISTERS: u16 = 125;
/// Protocol ceiling for one multi-register write.
pub const MAX_WRITE_REGISTERS: u16 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    ReadRegisters,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadRegisters => 0x03,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0x03 => Ok(Self::ReadRegisters),
            0x06 => Ok(Self::WriteSingleRegister),
            0x10 => Ok(Self::WriteMultipleRegisters),
            _ => Err(DecodeError::UnsupportedFunction),
        }
    }
}

fn validate_quantity(quantity: u16, max: u16) -> Result<(), EncodeError> {
    if quantity == 0 || quantity > max {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(())
}

fn validate_quantity_decode(quantity: u16, max: u16) -> Result<(), DecodeError> {
    if quantity == 0 || quantity > max {
        return Err(DecodeError::InvalidValue);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegistersRequest {
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRegistersRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        validate_quantity(self.quantity, MAX_READ_REGISTERS)?;
        w.write_u8(FunctionCode::ReadRegisters.as_u8())?;
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterRequest {
    pub address: u16,
    pub value: u16,
}

impl WriteSingleRegisterRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleRegister.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequest<'a> {
    pub start_address: u16,
    pub values: &'a [u16],
}

impl<'a> WriteMultipleRegistersRequest<'a> {
    pub fn quantity(&self) -> Result<u16, EncodeError> {
        let quantity: u16 = self
            .values
            .len()
            .try_into()
            .map_err(|_| EncodeError::ValueOutOfRange)?;
        validate_quantity(quantity, MAX_WRITE_REGISTERS)?;
        Ok(quantity)
    }

    /// Encode the request. `byte_count_scale` is the factor written into the
    /// byte-count field per register: 2 on the RTU wire, 4 on the ASCII wire
    /// (where every data byte occupies two characters). Peers ignore the
    /// field and trust the quantity header, so both framings interoperate.
    pub fn encode(&self, w: &mut Writer<'_>, byte_count_scale: u8) -> Result<(), EncodeError> {
        let quantity = self.quantity()?;
        let byte_count: u8 = (usize::from(quantity) * usize::from(byte_count_scale))
            .try_into()
            .map_err(|_| EncodeError::ValueOutOfRange)?;

        w.write_u8(FunctionCode::WriteMultipleRegisters.as_u8())?;
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(quantity)?;
        w.write_u8(byte_count)?;
        for value in self.values {
            w.write_be_u16(*value)?;
        }
        Ok(())
    }
}

/// Borrowed decode representation for multi-write payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequestData<'a> {
    pub start_address: u16,
    pub quantity: u16,
    pub values_bytes: &'a [u8],
}

impl<'a> WriteMultipleRegistersRequestData<'a> {
    pub fn register(&self, index: usize) -> Option<u16> {
        let offset = index.checked_mul(2)?;
        let bytes = self.values_bytes.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

/// Request as decoded by the slave side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedRequest<'a> {
    ReadRegisters(ReadRegistersRequest),
    WriteSingleRegister(WriteSingleRegisterRequest),
    WriteMultipleRegisters(WriteMultipleRegistersRequestData<'a>),
}

impl<'a> DecodedRequest<'a> {
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadRegisters(_) => FunctionCode::ReadRegisters,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub fn decode(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let function = FunctionCode::from_u8(r.read_u8()?)?;
        match function {
            FunctionCode::ReadRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                validate_quantity_decode(quantity, MAX_READ_REGISTERS)?;
                Ok(Self::ReadRegisters(ReadRegistersRequest {
                    start_address,
                    quantity,
                }))
            }
            FunctionCode::WriteSingleRegister => {
                let address = r.read_be_u16()?;
                let value = r.read_be_u16()?;
                Ok(Self::WriteSingleRegister(WriteSingleRegisterRequest {
                    address,
                    value,
                }))
            }
            FunctionCode::WriteMultipleRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                validate_quantity_decode(quantity, MAX_WRITE_REGISTERS)?;
                // The byte-count field is read but not trusted: ASCII peers
                // write it scaled by 4 instead of 2 (see the encode side).
                // The quantity header is authoritative.
                let _byte_count = r.read_u8()?;
                let values_bytes = r.read_exact(usize::from(quantity) * 2)?;
                Ok(Self::WriteMultipleRegisters(
                    WriteMultipleRegistersRequestData {
                        start_address,
                        quantity,
                        values_bytes,
                    },
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegistersResponse<'a> {
    pub values: &'a [u16],
}

impl<'a> ReadRegistersResponse<'a> {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let byte_count: u8 = (self.values.len() * 2)
            .try_into()
            .map_err(|_| EncodeError::ValueOutOfRange)?;
        w.write_u8(FunctionCode::ReadRegisters.as_u8())?;
        w.write_u8(byte_count)?;
        for value in self.values {
            w.write_be_u16(*value)?;
        }
        Ok(())
    }
}

/// Borrowed decode representation for read responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegistersResponseData<'a> {
    pub values_bytes: &'a [u8],
}

impl<'a> ReadRegistersResponseData<'a> {
    pub fn register_count(&self) -> usize {
        self.values_bytes.len() / 2
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        let offset = index.checked_mul(2)?;
        let bytes = self.values_bytes.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterResponse {
    pub address: u16,
    pub value: u16,
}

impl WriteSingleRegisterResponse {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleRegister.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersResponse {
    pub start_address: u16,
    pub quantity: u16,
}

impl WriteMultipleRegistersResponse {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteMultipleRegisters.as_u8())?;
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(self.quantity)
    }
}

/// Response as decoded by the master side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedResponse<'a> {
    ReadRegisters(ReadRegistersResponseData<'a>),
    WriteSingleRegister(WriteSingleRegisterResponse),
    WriteMultipleRegisters(WriteMultipleRegistersResponse),
}

impl<'a> DecodedResponse<'a> {
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadRegisters(_) => FunctionCode::ReadRegisters,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub fn decode(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let function = FunctionCode::from_u8(r.read_u8()?)?;
        match function {
            FunctionCode::ReadRegisters => {
                let byte_count = usize::from(r.read_u8()?);
                if byte_count % 2 != 0 {
                    return Err(DecodeError::InvalidLength);
                }
                let values_bytes = r.read_exact(byte_count)?;
                Ok(Self::ReadRegisters(ReadRegistersResponseData {
                    values_bytes,
                }))
            }
            FunctionCode::WriteSingleRegister => {
                let address = r.read_be_u16()?;
                let value = r.read_be_u16()?;
                Ok(Self::WriteSingleRegister(WriteSingleRegisterResponse {
                    address,
                    value,
                }))
            }
            FunctionCode::WriteMultipleRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                Ok(Self::WriteMultipleRegisters(WriteMultipleRegistersResponse {
                    start_address,
                    quantity,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DecodedRequest, DecodedResponse, FunctionCode, ReadRegistersRequest,
        ReadRegistersResponse, WriteMultipleRegistersRequest, WriteSingleRegisterRequest,
    };
    use crate::encoding::{Reader, Writer};
    use crate::{DecodeError, EncodeError};

    #[test]
    fn read_request_golden_encode() {
        let req = ReadRegistersRequest {
            start_address: 0x006B,
            quantity: 3,
        };
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();
        assert_eq!(w.as_written(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn read_request_rejects_zero_quantity() {
        let req = ReadRegistersRequest {
            start_address: 0,
            quantity: 0,
        };
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        assert_eq!(req.encode(&mut w).unwrap_err(), EncodeError::ValueOutOfRange);
    }

    #[test]
    fn multi_write_request_roundtrip() {
        let req = WriteMultipleRegistersRequest {
            start_address: 0x0002,
            values: &[0x000A, 0x0102],
        };
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w, 2).unwrap();
        assert_eq!(
            w.as_written(),
            &[0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );

        let mut r = Reader::new(w.as_written());
        match DecodedRequest::decode(&mut r).unwrap() {
            DecodedRequest::WriteMultipleRegisters(data) => {
                assert_eq!(data.start_address, 0x0002);
                assert_eq!(data.quantity, 2);
                assert_eq!(data.register(0), Some(0x000A));
                assert_eq!(data.register(1), Some(0x0102));
                assert_eq!(data.register(2), None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn multi_write_ascii_byte_count_is_scaled() {
        let req = WriteMultipleRegistersRequest {
            start_address: 0,
            values: &[0x0001],
        };
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w, 4).unwrap();
        // Byte-count field carries 4 per register on the ASCII wire.
        assert_eq!(w.as_written()[5], 0x04);

        // The decoder ignores the field and still parses the payload.
        let mut r = Reader::new(w.as_written());
        assert!(matches!(
            DecodedRequest::decode(&mut r).unwrap(),
            DecodedRequest::WriteMultipleRegisters(_)
        ));
    }

    #[test]
    fn single_write_request_roundtrip() {
        let req = WriteSingleRegisterRequest {
            address: 0x0002,
            value: 0x0005,
        };
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        match DecodedRequest::decode(&mut r).unwrap() {
            DecodedRequest::WriteSingleRegister(decoded) => {
                assert_eq!(decoded.address, 0x0002);
                assert_eq!(decoded.value, 0x0005);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn read_response_roundtrip() {
        let resp = ReadRegistersResponse {
            values: &[0x022B, 0x0000, 0x0064],
        };
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        resp.encode(&mut w).unwrap();
        assert_eq!(
            w.as_written(),
            &[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]
        );

        let mut r = Reader::new(w.as_written());
        match DecodedResponse::decode(&mut r).unwrap() {
            DecodedResponse::ReadRegisters(data) => {
                assert_eq!(data.register_count(), 3);
                assert_eq!(data.register(0), Some(0x022B));
                assert_eq!(data.register(2), Some(0x0064));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn read_response_rejects_odd_byte_count() {
        let mut r = Reader::new(&[0x03, 0x03, 0x00, 0x2A, 0x00]);
        assert_eq!(
            DecodedResponse::decode(&mut r).unwrap_err(),
            DecodeError::InvalidLength
        );
    }

    #[test]
    fn unsupported_function_is_rejected() {
        assert_eq!(
            FunctionCode::from_u8(0x05).unwrap_err(),
            DecodeError::UnsupportedFunction
        );
        let mut r = Reader::new(&[0x17, 0x00, 0x00]);
        assert_eq!(
            DecodedRequest::decode(&mut r).unwrap_err(),
            DecodeError::UnsupportedFunction
        );
    }

    #[test]
    fn truncated_request_is_rejected() {
        let mut r = Reader::new(&[0x10, 0x00, 0x02, 0x00, 0x02, 0x04, 0x00]);
        assert_eq!(
            DecodedRequest::decode(&mut r).unwrap_err(),
            DecodeError::UnexpectedEof
        );
    }
}
