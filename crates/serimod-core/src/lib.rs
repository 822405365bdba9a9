//! Serial Modbus encoding primitives: ASCII and RTU framing in pure Rust.
//!
//! `serimod-core` provides allocation-free, `no_std`-compatible checksums
//! (CRC16, LRC8), hex<->binary conversion for ASCII framing, and typed
//! encoding/decoding of the register-access PDUs (function codes 0x03,
//! 0x06, 0x10) over caller-owned buffers.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "std")]
extern crate std;

pub mod checksum;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod hex;
pub mod pdu;

pub use error::{DecodeError, EncodeError};
