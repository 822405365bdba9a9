//! Poll-driven Modbus serial engine.
//!
//! The engine is transport-agnostic: an ISR or reader task feeds received
//! bytes through a [`ByteFeeder`], the application calls `poll` with a
//! monotonic millisecond clock, and completed frames go out through a send
//! callback. [`Master`] queues register commands and dispatches responses
//! to per-command handlers; [`Slave`] answers requests against a
//! [`RegisterStore`].

#![forbid(unsafe_code)]

pub mod detect;
pub mod intake;
pub mod master;
pub mod sim;
pub mod slave;

pub use intake::{intake, ByteDrain, ByteFeeder};
pub use master::{EnqueueError, Master, ResponseHandler};
pub use sim::RegisterBank;
pub use slave::{RegisterStore, Slave};

/// Serial transmission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    Ascii,
    Rtu,
}

/// Most registers one command may carry, matching the sizing of the
/// fixed frame buffers.
pub const REGISTER_LIMIT: u16 = 6;

/// Commands a master holds before enqueue starts evicting.
pub const COMMAND_QUEUE_DEPTH: usize = 5;

const DEFAULT_BIT_RATE: u32 = 9600;

/// Frame buffer size for a given register limit: worst case is an ASCII
/// multi-write (17 fixed characters plus four per register), padded.
pub(crate) fn frame_buffer_len(register_limit: u16) -> usize {
    usize::from(register_limit) * 4 + 20
}

/// Inter-character silence that ends an RTU frame: roughly four byte
/// times at the configured rate.
pub(crate) fn receive_timeout_ms(bit_rate: u32) -> u32 {
    4000 * 8 / bit_rate + 2
}

/// How long a master waits for a response before declaring the command
/// failed: two worst-case frames on the wire plus turnaround slack.
pub(crate) fn send_timeout_ms(bit_rate: u32, register_limit: u16) -> u32 {
    let frame = frame_buffer_len(register_limit) as u32;
    (frame * 2000 + 7000) * 8 / bit_rate + 5
}

/// Link and sizing parameters shared by masters and slaves.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Device address this endpoint sends to (master) or answers as (slave).
    pub address: u8,
    pub mode: FrameMode,
    /// Bits per second on the wire; 0 selects 9600 for timeout purposes.
    pub bit_rate: u32,
    /// Registers accepted per command, capped at [`REGISTER_LIMIT`].
    pub register_limit: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(1, FrameMode::Rtu)
    }
}

impl Config {
    pub fn new(address: u8, mode: FrameMode) -> Self {
        Self {
            address,
            mode,
            bit_rate: DEFAULT_BIT_RATE,
            register_limit: REGISTER_LIMIT,
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_register_limit(mut self, register_limit: u16) -> Self {
        self.register_limit = register_limit.min(REGISTER_LIMIT);
        self
    }

    pub(crate) fn effective_bit_rate(&self) -> u32 {
        if self.bit_rate == 0 {
            DEFAULT_BIT_RATE
        } else {
            self.bit_rate
        }
    }
}
