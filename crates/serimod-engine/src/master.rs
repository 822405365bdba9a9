//! Master role: command queue, send loop, and response dispatch.
//!
//! Register operations are queued and sent one at a time; at most one
//! command is awaiting a response. Responses are matched against the
//! head-of-queue command and completed through its handler; anything that
//! does not match is bus noise and leaves the command pending until its
//! send timeout settles it.

use std::collections::VecDeque;
use std::num::NonZeroU8;

use serimod_core::encoding::{Reader, Writer};
use serimod_core::frame::{ascii, rtu};
use serimod_core::pdu::{
    DecodedResponse, FunctionCode, ReadRegistersRequest, WriteMultipleRegistersRequest,
    WriteSingleRegisterRequest,
};
use serimod_core::EncodeError;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::detect::{Detection, FrameDetector};
use crate::intake::{intake, ByteDrain, ByteFeeder};
use crate::{
    frame_buffer_len, receive_timeout_ms, send_timeout_ms, Config, FrameMode, COMMAND_QUEUE_DEPTH,
    REGISTER_LIMIT,
};

/// Completion callback, typed per function code so a read command can
/// never be completed with a write result.
pub enum ResponseHandler {
    /// Receives the registers read; an empty slice reports failure.
    Read(Box<dyn FnOnce(&[u16]) + Send>),
    /// Receives the register address and the written count; count 0
    /// reports failure.
    Write(Box<dyn FnOnce(u16, u16) + Send>),
}

impl ResponseHandler {
    /// Complete with the failure sentinel (timeout or eviction).
    fn fail(self) {
        self.reject(0);
    }

    /// Complete with a zero-count result against `address`.
    fn reject(self, address: u16) {
        match self {
            Self::Read(handler) => handler(&[]),
            Self::Write(handler) => handler(address, 0),
        }
    }
}

/// Why a command was refused at enqueue time. The handler has already
/// been completed with a zero-count result when this is returned.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("register count {count} exceeds the access limit {limit}")]
    CapacityExceeded { count: u16, limit: u16 },
    #[error("encoded request does not fit the frame buffer")]
    FrameOverflow,
}

struct PendingCommand {
    index: NonZeroU8,
    function: FunctionCode,
    frame: Vec<u8>,
    expected_response_len: usize,
    handler: Option<ResponseHandler>,
    /// Register address the request targets.
    address: u16,
    /// Registers requested or written.
    count: u16,
    /// Value sent with a single-register write, echoed by the peer.
    value: u16,
}

enum Outcome {
    Read(usize),
    Write { address: u16, count: u16 },
}

pub struct Master {
    mode: FrameMode,
    register_limit: u16,
    receive_timeout_ms: u32,
    send_timeout_ms: u32,
    fast_mode: bool,
    send: Box<dyn FnMut(&[u8]) + Send>,
    drain: ByteDrain,
    detector: FrameDetector,
    queue: VecDeque<PendingCommand>,
    next_index: u8,
    awaiting_response: bool,
    last_sent_ms: u32,
    registers: Vec<u16>,
    address: u8,
}

impl Master {
    /// `send` transmits one fully framed request; it is called from
    /// `poll` only, never from the byte feeder side.
    pub fn new(config: Config, send: impl FnMut(&[u8]) + Send + 'static) -> Self {
        let register_limit = config.register_limit.min(REGISTER_LIMIT);
        let bit_rate = config.effective_bit_rate();
        let (_, drain) = intake(frame_buffer_len(register_limit) * 2);
        Self {
            mode: config.mode,
            register_limit,
            receive_timeout_ms: receive_timeout_ms(bit_rate),
            send_timeout_ms: send_timeout_ms(bit_rate, register_limit),
            fast_mode: false,
            send: Box::new(send),
            detector: FrameDetector::new(config.mode, config.address, register_limit),
            drain,
            queue: VecDeque::with_capacity(COMMAND_QUEUE_DEPTH),
            next_index: 0,
            awaiting_response: false,
            last_sent_ms: 0,
            registers: vec![0; usize::from(register_limit)],
            address: config.address,
        }
    }

    /// Producer handle for received bytes, safe to hand to an ISR shim
    /// or reader task.
    pub fn feeder(&self) -> ByteFeeder {
        self.drain.feeder()
    }

    /// In fast mode only the most recently enqueued command is sent;
    /// older unsent commands are discarded without completion.
    pub fn set_fast_mode(&mut self, enabled: bool) {
        self.fast_mode = enabled;
    }

    /// Rederive both timeouts from the wire rate.
    pub fn set_bit_rate(&mut self, bit_rate: u32) {
        if bit_rate > 0 {
            self.receive_timeout_ms = receive_timeout_ms(bit_rate);
            self.send_timeout_ms = send_timeout_ms(bit_rate, self.register_limit);
        }
    }

    /// Override the derived timeouts; `None` keeps the current value.
    pub fn set_timeouts(&mut self, receive_ms: Option<u32>, send_ms: Option<u32>) {
        if let Some(ms) = receive_ms {
            self.receive_timeout_ms = ms;
        }
        if let Some(ms) = send_ms {
            self.send_timeout_ms = ms;
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue a holding-register read. The handler receives the values,
    /// or an empty slice on timeout. At most the configured register
    /// limit is delivered, whatever the peer answers.
    pub fn read_registers(
        &mut self,
        address: u16,
        count: u16,
        on_complete: impl FnOnce(&[u16]) + Send + 'static,
    ) -> Result<NonZeroU8, EnqueueError> {
        let request = ReadRegistersRequest {
            start_address: address,
            quantity: count,
        };
        self.enqueue(
            FunctionCode::ReadRegisters,
            address,
            count,
            0,
            ResponseHandler::Read(Box::new(on_complete)),
            |w, _| request.encode(w),
        )
    }

    /// Queue a single-register write. The handler receives the register
    /// address and count 1, or count 0 on timeout.
    pub fn write_register(
        &mut self,
        address: u16,
        value: u16,
        on_complete: impl FnOnce(u16, u16) + Send + 'static,
    ) -> Result<NonZeroU8, EnqueueError> {
        let request = WriteSingleRegisterRequest { address, value };
        self.enqueue(
            FunctionCode::WriteSingleRegister,
            address,
            1,
            value,
            ResponseHandler::Write(Box::new(on_complete)),
            |w, _| request.encode(w),
        )
    }

    /// Queue a multi-register write. The handler receives the start
    /// address and the count accepted by the peer, or count 0 on timeout.
    pub fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
        on_complete: impl FnOnce(u16, u16) + Send + 'static,
    ) -> Result<NonZeroU8, EnqueueError> {
        let count = values.len().try_into().unwrap_or(u16::MAX);
        let request = WriteMultipleRegistersRequest {
            start_address: address,
            values,
        };
        self.enqueue(
            FunctionCode::WriteMultipleRegisters,
            address,
            count,
            0,
            ResponseHandler::Write(Box::new(on_complete)),
            |w, scale| request.encode(w, scale),
        )
    }

    fn enqueue(
        &mut self,
        function: FunctionCode,
        address: u16,
        count: u16,
        value: u16,
        handler: ResponseHandler,
        encode: impl FnOnce(&mut Writer<'_>, u8) -> Result<(), EncodeError>,
    ) -> Result<NonZeroU8, EnqueueError> {
        let limit = self.register_limit;
        // Writes over the access limit are refused outright. Oversized
        // reads go out unchanged; the response is clamped on receipt.
        if function != FunctionCode::ReadRegisters && count > limit {
            warn!(count, limit, "register count over access limit, rejected");
            handler.reject(address);
            return Err(EnqueueError::CapacityExceeded { count, limit });
        }

        let buffer_len = frame_buffer_len(limit);
        let mut pdu = vec![0u8; buffer_len];
        let mut w = Writer::new(&mut pdu);
        let scale = match self.mode {
            FrameMode::Rtu => 2,
            FrameMode::Ascii => 4,
        };
        if let Err(err) = encode(&mut w, scale) {
            handler.reject(address);
            return Err(match err {
                EncodeError::ValueOutOfRange => EnqueueError::CapacityExceeded { count, limit },
                _ => EnqueueError::FrameOverflow,
            });
        }
        let pdu_len = w.written();

        let mut frame = vec![0u8; buffer_len];
        let mut w = Writer::new(&mut frame);
        let framed = match self.mode {
            FrameMode::Ascii => ascii::encode_frame(&mut w, self.address, &pdu[..pdu_len]),
            FrameMode::Rtu => rtu::encode_frame(&mut w, self.address, &pdu[..pdu_len]),
        };
        if framed.is_err() {
            handler.reject(address);
            return Err(EnqueueError::FrameOverflow);
        }
        let frame_len = w.written();
        frame.truncate(frame_len);

        let index = self.allocate_index();
        let expected_response_len = self.expected_response_len(function, count);
        self.push_command(PendingCommand {
            index,
            function,
            frame,
            expected_response_len,
            handler: Some(handler),
            address,
            count,
            value,
        });
        trace!(index = index.get(), ?function, address, count, "command queued");
        Ok(index)
    }

    fn allocate_index(&mut self) -> NonZeroU8 {
        self.next_index = self.next_index.wrapping_add(1);
        if self.next_index == 0 {
            self.next_index = 1;
        }
        NonZeroU8::new(self.next_index).unwrap_or(NonZeroU8::MIN)
    }

    fn push_command(&mut self, command: PendingCommand) {
        if self.queue.len() == COMMAND_QUEUE_DEPTH {
            if let Some(evicted) = self.queue.pop_front() {
                warn!(index = evicted.index.get(), "queue full, oldest command evicted");
                if let Some(handler) = evicted.handler {
                    handler.fail();
                }
                // The evicted head may have been on the wire; its response,
                // if any, will no longer match and is dropped as noise.
                self.awaiting_response = false;
            }
        }
        self.queue.push_back(command);
    }

    fn expected_response_len(&self, function: FunctionCode, count: u16) -> usize {
        match (self.mode, function) {
            (FrameMode::Rtu, FunctionCode::ReadRegisters) => 5 + 2 * usize::from(count),
            (FrameMode::Rtu, _) => 8,
            (FrameMode::Ascii, FunctionCode::ReadRegisters) => 11 + 4 * usize::from(count),
            (FrameMode::Ascii, _) => 17,
        }
    }

    /// Drive the engine: dispatch received frames, settle the receive
    /// silence, time out or send the head-of-queue command. `now_ms` is
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
        self.pump_queue(now_ms);
    }

    fn process_incoming(&mut self, timed_out: bool) {
        loop {
            let expected = match self.queue.front() {
                Some(command) => command.expected_response_len,
                None => {
                    // Nothing awaited; whatever is on the line is noise.
                    self.drain.clear();
                    self.detector.reset();
                    return;
                }
            };
            match self.detector.poll(&mut self.drain, expected, timed_out) {
                Detection::Pending => return,
                Detection::Frame => self.dispatch_response(),
            }
        }
    }

    fn dispatch_response(&mut self) {
        let outcome = match self.queue.front() {
            Some(command) => match_response(
                self.detector.frame(),
                command,
                self.register_limit,
                &mut self.registers,
            ),
            None => None,
        };
        self.detector.finish();

        let Some(outcome) = outcome else {
            debug!("frame does not match the awaited command, ignored");
            return;
        };
        if let Some(command) = self.queue.pop_front() {
            self.awaiting_response = false;
            trace!(index = command.index.get(), "command completed");
            match (command.handler, outcome) {
                (Some(ResponseHandler::Read(handler)), Outcome::Read(count)) => {
                    handler(&self.registers[..count]);
                }
                (Some(ResponseHandler::Write(handler)), Outcome::Write { address, count }) => {
                    handler(address, count);
                }
                _ => {}
            }
        }
    }

    fn pump_queue(&mut self, now_ms: u32) {
        if self.queue.is_empty() {
            return;
        }
        if self.awaiting_response {
            if now_ms.wrapping_sub(self.last_sent_ms) < self.send_timeout_ms {
                return;
            }
            if let Some(command) = self.queue.pop_front() {
                warn!(index = command.index.get(), "response timed out");
                if let Some(handler) = command.handler {
                    handler.fail();
                }
            }
            self.awaiting_response = false;
        }
        if self.fast_mode && self.queue.len() > 1 {
            let dropped = self.queue.len() - 1;
            let newest = self.queue.pop_back();
            self.queue.clear();
            if let Some(newest) = newest {
                self.queue.push_back(newest);
            }
            debug!(dropped, "fast mode dropped stale commands");
        }
        if let Some(command) = self.queue.front() {
            (self.send)(&command.frame);
            self.awaiting_response = true;
            self.last_sent_ms = now_ms;
            trace!(
                index = command.index.get(),
                len = command.frame.len(),
                "request sent"
            );
        }
    }
}

/// Match a verified frame against the awaited command. Returns `None`
/// when the frame is noise; read values are staged into `registers`.
fn match_response(
    frame: &[u8],
    command: &PendingCommand,
    limit: u16,
    registers: &mut [u16],
) -> Option<Outcome> {
    let mut r = Reader::new(frame.get(1..)?);
    let response = DecodedResponse::decode(&mut r).ok()?;
    match response {
        DecodedResponse::ReadRegisters(data) => {
            if command.function != FunctionCode::ReadRegisters
                || data.values_bytes.len() != usize::from(command.count) * 2
            {
                return None;
            }
            let count = data.register_count().min(usize::from(limit));
            for (i, slot) in registers.iter_mut().take(count).enumerate() {
                *slot = data.register(i)?;
            }
            Some(Outcome::Read(count))
        }
        DecodedResponse::WriteSingleRegister(echo) => {
            if command.function != FunctionCode::WriteSingleRegister
                || echo.address != command.address
                || echo.value != command.value
            {
                return None;
            }
            Some(Outcome::Write {
                address: echo.address,
                count: 1,
            })
        }
        DecodedResponse::WriteMultipleRegisters(echo) => {
            if command.function != FunctionCode::WriteMultipleRegisters
                || echo.start_address != command.address
                || echo.quantity != command.count
            {
                return None;
            }
            Some(Outcome::Write {
                address: echo.start_address,
                count: echo.quantity,
            })
        }
    }
}
