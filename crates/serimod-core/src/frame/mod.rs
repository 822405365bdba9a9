//! Wire framing for the two serial transmission modes.

pub mod ascii;
pub mod rtu;
