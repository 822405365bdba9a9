//! Frame detection over the byte intake.
//!
//! The detector is a small state machine: idle until a start condition
//! (`':'` in ASCII mode, the configured device address in RTU mode), then
//! capturing into a fixed accumulator until the mode's termination rule
//! fires. A completed frame is exposed as `<address><function><data...>`
//! with the checksum already verified and stripped.

use serimod_core::checksum;
use serimod_core::frame::ascii;
use serimod_core::DecodeError;
use tracing::{debug, warn};

use crate::intake::ByteDrain;
use crate::{frame_buffer_len, FrameMode};

/// Outcome of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// No complete frame yet; call again when more bytes or time arrive.
    Pending,
    /// A verified frame is available through [`FrameDetector::frame`].
    /// Call [`FrameDetector::finish`] once it has been handled.
    Frame,
}

pub struct FrameDetector {
    mode: FrameMode,
    address: u8,
    buf: Vec<u8>,
    len: usize,
    started: bool,
    payload_len: usize,
    rest_start: usize,
    rest_len: usize,
}

impl FrameDetector {
    pub fn new(mode: FrameMode, address: u8, register_limit: u16) -> Self {
        Self {
            mode,
            address,
            buf: vec![0; frame_buffer_len(register_limit)],
            len: 0,
            started: false,
            payload_len: 0,
            rest_start: 0,
            rest_len: 0,
        }
    }

    /// Consume available bytes and try to complete a frame.
    ///
    /// `expected_len` is the total expected frame length including the
    /// checksum trailer, or 0 when unknown (slave side, or ASCII where the
    /// delimiters rule). `timed_out` tells the detector that the
    /// inter-frame silence has elapsed since the last received byte.
    pub fn poll(
        &mut self,
        drain: &mut ByteDrain,
        expected_len: usize,
        timed_out: bool,
    ) -> Detection {
        match self.mode {
            FrameMode::Rtu => self.poll_rtu(drain, expected_len, timed_out),
            FrameMode::Ascii => self.poll_ascii(drain),
        }
    }

    /// The completed frame: device address followed by the PDU, checksum
    /// stripped. Valid only after `poll` returned [`Detection::Frame`] and
    /// until [`FrameDetector::finish`].
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.payload_len]
    }

    /// Release the completed frame. Bytes that followed it in the same
    /// burst are carried over and re-scanned as the start of the next
    /// frame.
    pub fn finish(&mut self) {
        self.payload_len = 0;
        if self.rest_len == 0 {
            self.len = 0;
            self.started = false;
            return;
        }
        self.buf
            .copy_within(self.rest_start..self.rest_start + self.rest_len, 0);
        self.len = self.rest_len;
        self.rest_len = 0;
        match self.mode {
            // RTU re-enters capture at the next address byte in the
            // carried rest; anything before it is noise.
            FrameMode::Rtu => {
                match self.buf[..self.len].iter().position(|&b| b == self.address) {
                    Some(start) => {
                        if start > 0 {
                            self.buf.copy_within(start..self.len, 0);
                            self.len -= start;
                        }
                        self.started = true;
                    }
                    None => {
                        self.len = 0;
                        self.started = false;
                    }
                }
            }
            FrameMode::Ascii => {}
        }
    }

    /// Drop any partial frame state, e.g. after a receive timeout was
    /// handled at a higher level. Consumed bytes are never re-examined.
    pub fn reset(&mut self) {
        self.len = 0;
        self.started = false;
        self.payload_len = 0;
        self.rest_len = 0;
    }

    fn abandon(&mut self) {
        self.len = 0;
        self.started = false;
    }

    fn poll_rtu(
        &mut self,
        drain: &mut ByteDrain,
        expected_len: usize,
        timed_out: bool,
    ) -> Detection {
        while !self.started {
            match drain.pop() {
                Some(byte) if byte == self.address => {
                    self.buf[0] = byte;
                    self.len = 1;
                    self.started = true;
                }
                Some(_) => {}
                None => return Detection::Pending,
            }
        }
        while self.len < self.buf.len() {
            match drain.pop() {
                Some(byte) => {
                    self.buf[self.len] = byte;
                    self.len += 1;
                }
                None => break,
            }
        }

        let full = self.len == self.buf.len();
        let reached_expected = expected_len > 0 && self.len >= expected_len;
        if !(timed_out || full || reached_expected) {
            return Detection::Pending;
        }

        if self.len < 2 {
            if timed_out || full {
                self.abandon();
            }
            return Detection::Pending;
        }
        if self.len >= 4 && checksum::verify_crc16(&self.buf[..self.len]) {
            self.payload_len = self.len - 2;
            self.rest_len = 0;
            return Detection::Frame;
        }
        // Second chance for back-to-back frames: the expected-length prefix
        // may be a valid frame with the next one's bytes trailing it.
        if expected_len >= 4
            && expected_len < self.len
            && checksum::verify_crc16(&self.buf[..expected_len])
        {
            self.payload_len = expected_len - 2;
            self.rest_start = expected_len;
            self.rest_len = self.len - expected_len;
            return Detection::Frame;
        }
        if timed_out || full {
            warn!(len = self.len, "crc mismatch, frame abandoned");
            self.abandon();
        }
        // Otherwise the frame may simply be longer than expected; keep
        // capturing until silence settles it.
        Detection::Pending
    }

    fn poll_ascii(&mut self, drain: &mut ByteDrain) -> Detection {
        loop {
            if !self.started {
                match drain.pop() {
                    Some(ascii::START) => {
                        self.started = true;
                        self.len = 0;
                    }
                    Some(_) => {}
                    None => return Detection::Pending,
                }
                continue;
            }
            match drain.peek() {
                None => return Detection::Pending,
                Some(ascii::CR) => {
                    // The LF must be inspected together with the CR; defer
                    // if it has not arrived yet.
                    if drain.len() < 2 {
                        return Detection::Pending;
                    }
                    drain.pop();
                    if drain.pop() != Some(ascii::LF) {
                        debug!(err = ?DecodeError::MalformedDelimiter, "frame dropped");
                        self.abandon();
                        continue;
                    }
                    if self.terminate_ascii() == Detection::Frame {
                        return Detection::Frame;
                    }
                }
                Some(byte) => {
                    drain.pop();
                    if self.len == self.buf.len() {
                        warn!("ascii frame overflows accumulator, dropped");
                        self.abandon();
                    } else {
                        self.buf[self.len] = byte;
                        self.len += 1;
                    }
                }
            }
        }
    }

    fn terminate_ascii(&mut self) -> Detection {
        match self.decode_ascii_body() {
            Ok(payload_len) => {
                self.payload_len = payload_len;
                self.rest_len = 0;
                Detection::Frame
            }
            Err(err) => {
                warn!(?err, "ascii frame rejected");
                self.abandon();
                Detection::Pending
            }
        }
    }

    fn decode_ascii_body(&mut self) -> Result<usize, DecodeError> {
        let len = self.len;
        let payload_len = ascii::decode_body_in_place(&mut self.buf[..len])?;
        if self.buf[0] != self.address {
            return Err(DecodeError::AddressMismatch);
        }
        Ok(payload_len)
    }
}
