// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::time::Duration;
use thiserror::Error;
use crate::protocol::Mode;
use crate::responder::Responder;
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link closed by peer")]
    Closed,
}

// ============================================================================
// DuplexChannel Trait
// ============================================================================

/// A synchronous full-duplex byte link.
///
/// Every transfer carries one byte each way. The byte returned is the one
/// the peer had queued before it saw `out`.
pub trait DuplexChannel {
    fn transfer(&mut self, out: u8) -> Result<u8, ChannelError>;

    /// Ready to accept a new byte
    fn ready(&mut self) -> bool {
        true
    }

    /// A transfer is still being clocked
    fn busy(&mut self) -> bool {
        false
    }
}

impl<T: DuplexChannel + ?Sized> DuplexChannel for Box<T> {
    fn transfer(&mut self, out: u8) -> Result<u8, ChannelError> {
        (**self).transfer(out)
    }

    fn ready(&mut self) -> bool {
        (**self).ready()
    }

    fn busy(&mut self) -> bool {
        (**self).busy()
    }
}

// ============================================================================
// Serial Channel
// ============================================================================

/// Duplex emulation on a byte-stream port: write one byte, read one back.
///
/// The last byte received is latched. If the peer does not answer within
/// `reply_timeout` the latched value is returned again. Anything still
/// waiting in the input buffer is discarded before a byte goes out, so a
/// late reply cannot be taken for the answer to the next transfer.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    reply_timeout: Duration,
    latched: u8,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>, reply_timeout: Duration) -> Self {
        SerialChannel {
            port,
            reply_timeout,
            latched: 0,
        }
    }
}

impl DuplexChannel for SerialChannel {
    fn transfer(&mut self, out: u8) -> Result<u8, ChannelError> {
        self.port.clear_input()?;
        self.port.write_all(&[out])?;

        let mut buf = [0u8; 1];
        match self.port.read_timeout(&mut buf, self.reply_timeout) {
            Ok(0) => return Err(ChannelError::Closed),
            Ok(_) => self.latched = buf[0],
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                tracing::warn!("no reply to 0x{:02X}, reusing 0x{:02X}", out, self.latched);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(self.latched)
    }
}

// ============================================================================
// Loopback Channel
// ============================================================================

/// Couples the requester directly to an in-process responder.
pub struct LoopbackChannel {
    responder: Responder,
}

impl LoopbackChannel {
    pub fn new(mode: Mode) -> Self {
        LoopbackChannel {
            responder: Responder::new(mode),
        }
    }

    #[cfg(test)]
    pub fn responder(&self) -> &Responder {
        &self.responder
    }
}

impl DuplexChannel for LoopbackChannel {
    fn transfer(&mut self, out: u8) -> Result<u8, ChannelError> {
        let reply = self.responder.transmit_register();
        self.responder.receive(out);
        Ok(reply)
    }
}

// ============================================================================
// Mock Channel for Testing
// ============================================================================

/// Replays scripted replies and checks the bytes sent against an expected
/// script when dropped. Can report "not ready" or "busy" for the first few
/// polls.
#[cfg(test)]
pub struct MockChannel {
    replies: Vec<u8>,
    reply_pos: usize,
    write_log: Vec<u8>,
    expected_writes: Vec<u8>,
    not_ready_polls: usize,
    busy_left: usize,
    pub polls: usize,
    pub busy_polls: usize,
}

#[cfg(test)]
impl MockChannel {
    pub fn new(replies: Vec<u8>, expected_writes: Vec<u8>) -> Self {
        MockChannel {
            replies,
            reply_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            not_ready_polls: 0,
            busy_left: 0,
            polls: 0,
            busy_polls: 0,
        }
    }

    pub fn not_ready_for(mut self, polls: usize) -> Self {
        self.not_ready_polls = polls;
        self
    }

    pub fn busy_for(mut self, polls: usize) -> Self {
        self.busy_left = polls;
        self
    }
}

#[cfg(test)]
impl DuplexChannel for MockChannel {
    fn transfer(&mut self, out: u8) -> Result<u8, ChannelError> {
        self.write_log.push(out);
        match self.replies.get(self.reply_pos) {
            Some(&reply) => {
                self.reply_pos += 1;
                Ok(reply)
            }
            None => Err(ChannelError::Closed),
        }
    }

    fn ready(&mut self) -> bool {
        self.polls += 1;
        if self.not_ready_polls > 0 {
            self.not_ready_polls -= 1;
            false
        } else {
            true
        }
    }

    fn busy(&mut self) -> bool {
        self.busy_polls += 1;
        if self.busy_left > 0 {
            self.busy_left -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
impl Drop for MockChannel {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.reply_pos,
            self.replies.len(),
            "MockChannel dropped with {} unconsumed replies",
            self.replies.len() - self.reply_pos,
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockChannel write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
