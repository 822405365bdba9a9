//! Slave role: answers register requests against externally supplied
//! storage accessors.

use serimod_core::encoding::{Reader, Writer};
use serimod_core::frame::{ascii, rtu};
use serimod_core::pdu::{
    DecodedRequest, ReadRegistersResponse, WriteMultipleRegistersResponse,
    WriteSingleRegisterResponse,
};
use tracing::{trace, warn};

use crate::detect::{Detection, FrameDetector};
use crate::intake::{intake, ByteDrain, ByteFeeder};
use crate::{frame_buffer_len, receive_timeout_ms, Config, FrameMode, REGISTER_LIMIT};

/// Register storage behind a slave. Both accessors report how many
/// registers they actually served; partial service is allowed.
pub trait RegisterStore {
    /// Fill `out` with registers starting at `address`; returns the
    /// number filled.
    fn load(&mut self, address: u16, out: &mut [u16]) -> usize;

    /// Write `values` starting at `address`; returns the number accepted.
    /// Returning less than `values.len()` on a single-register write
    /// signals failure to the requesting master.
    fn store(&mut self, address: u16, values: &[u16]) -> usize;
}

enum Action {
    Read { address: u16, count: u16 },
    WriteSingle { address: u16, value: u16 },
    /// Values are staged in the register window; count 0 means the
    /// request exceeded the access limit and nothing is written.
    WriteMultiple { address: u16, count: u16 },
}

pub struct Slave<R: RegisterStore> {
    address: u8,
    mode: FrameMode,
    register_limit: u16,
    receive_timeout_ms: u32,
    send: Box<dyn FnMut(&[u8]) + Send>,
    store: R,
    drain: ByteDrain,
    detector: FrameDetector,
    registers: Vec<u16>,
    response_buf: Vec<u8>,
}

impl<R: RegisterStore> Slave<R> {
    pub fn new(config: Config, store: R, send: impl FnMut(&[u8]) + Send + 'static) -> Self {
        let register_limit = config.register_limit.min(REGISTER_LIMIT);
        let (_, drain) = intake(frame_buffer_len(register_limit) * 2);
        Self {
            address: config.address,
            mode: config.mode,
            register_limit,
            receive_timeout_ms: receive_timeout_ms(config.effective_bit_rate()),
            send: Box::new(send),
            store,
            detector: FrameDetector::new(config.mode, config.address, register_limit),
            drain,
            registers: vec![0; usize::from(register_limit)],
            response_buf: vec![0; frame_buffer_len(register_limit)],
        }
    }

    pub fn feeder(&self) -> ByteFeeder {
        self.drain.feeder()
    }

    pub fn set_bit_rate(&mut self, bit_rate: u32) {
        if bit_rate > 0 {
            self.receive_timeout_ms = receive_timeout_ms(bit_rate);
        }
    }

    pub fn set_receive_timeout(&mut self, timeout_ms: u32) {
        self.receive_timeout_ms = timeout_ms;
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut R {
        &mut self.store
    }

    /// Drive the engine: assemble requests and answer them. `now_ms` is
    /// any monotonic millisecond clock; wraparound is handled.
    pub fn poll(&mut self, now_ms: u32) {
        if !self.drain.is_empty() {
            self.process_incoming(false);
        }
        if now_ms.wrapping_sub(self.drain.last_received_ms()) > self.receive_timeout_ms {
            self.process_incoming(true);
            self.detector.reset();
            self.drain.stamp_received(now_ms);
        }
    }

    fn process_incoming(&mut self, timed_out: bool) {
        while self.detector.poll(&mut self.drain, 0, timed_out) == Detection::Frame {
            self.dispatch_request();
        }
    }

    fn dispatch_request(&mut self) {
        let action = parse_request(
            self.detector.frame(),
            self.register_limit,
            &mut self.registers,
        );
        self.detector.finish();
        match action {
            None => {}
            Some(Action::Read { address, count }) => self.respond_read(address, count),
            Some(Action::WriteSingle { address, value }) => {
                self.respond_write_single(address, value)
            }
            Some(Action::WriteMultiple { address, count }) => {
                self.respond_write_multiple(address, count)
            }
        }
    }

    fn respond_read(&mut self, address: u16, count: u16) {
        let window = &mut self.registers[..usize::from(count)];
        let served = self.store.load(address, window).min(window.len());
        trace!(address, count, served, "read request answered");

        let mut pdu = [0u8; 32];
        let mut w = Writer::new(&mut pdu);
        let encoded = ReadRegistersResponse {
            values: &self.registers[..served],
        }
        .encode(&mut w);
        if encoded.is_ok() {
            let len = w.written();
            self.transmit(&pdu[..len]);
        }
    }

    fn respond_write_single(&mut self, address: u16, value: u16) {
        let accepted = self.store.store(address, &[value]);
        // A refused write echoes the complemented value so the master
        // sees the mismatch.
        let echoed = if accepted == 1 { value } else { !value };
        trace!(address, value, accepted, "single write answered");

        let mut pdu = [0u8; 8];
        let mut w = Writer::new(&mut pdu);
        let encoded = WriteSingleRegisterResponse {
            address,
            value: echoed,
        }
        .encode(&mut w);
        if encoded.is_ok() {
            let len = w.written();
            self.transmit(&pdu[..len]);
        }
    }

    fn respond_write_multiple(&mut self, address: u16, count: u16) {
        let accepted = self
            .store
            .store(address, &self.registers[..usize::from(count)]);
        let quantity = accepted.try_into().unwrap_or(u16::MAX);
        trace!(address, count, accepted, "multi write answered");

        let mut pdu = [0u8; 8];
        let mut w = Writer::new(&mut pdu);
        let encoded = WriteMultipleRegistersResponse {
            start_address: address,
            quantity,
        }
        .encode(&mut w);
        if encoded.is_ok() {
            let len = w.written();
            self.transmit(&pdu[..len]);
        }
    }

    fn transmit(&mut self, pdu: &[u8]) {
        let mut w = Writer::new(&mut self.response_buf);
        let framed = match self.mode {
            FrameMode::Ascii => ascii::encode_frame(&mut w, self.address, pdu),
            FrameMode::Rtu => rtu::encode_frame(&mut w, self.address, pdu),
        };
        match framed {
            Ok(()) => {
                let len = w.written();
                (self.send)(&self.response_buf[..len]);
            }
            Err(_) => warn!("response does not fit the frame buffer, dropped"),
        }
    }
}

/// Decode a verified frame into an action, staging multi-write values
/// into the register window. `None` means the request is discarded.
fn parse_request(frame: &[u8], limit: u16, registers: &mut [u16]) -> Option<Action> {
    let mut r = Reader::new(frame.get(1..)?);
    let request = match DecodedRequest::decode(&mut r) {
        Ok(request) => request,
        Err(err) => {
            warn!(?err, "request discarded");
            return None;
        }
    };
    match request {
        DecodedRequest::ReadRegisters(req) => Some(Action::Read {
            address: req.start_address,
            count: req.quantity.min(limit),
        }),
        DecodedRequest::WriteSingleRegister(req) => Some(Action::WriteSingle {
            address: req.address,
            value: req.value,
        }),
        DecodedRequest::WriteMultipleRegisters(data) => {
            if data.quantity > limit {
                warn!(
                    quantity = data.quantity,
                    limit, "multi write over access limit, nothing written"
                );
                return Some(Action::WriteMultiple {
                    address: data.start_address,
                    count: 0,
                });
            }
            for (i, slot) in registers
                .iter_mut()
                .take(usize::from(data.quantity))
                .enumerate()
            {
                *slot = data.register(i)?;
            }
            Some(Action::WriteMultiple {
                address: data.start_address,
                count: data.quantity,
            })
        }
    }
}
