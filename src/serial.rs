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
use serialport::{SerialPort as SerialPortTrait, ClearBuffer, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte-stream port underneath both ends of the link.
///
/// `read_timeout` returning `Ok(0)` means the port has been closed.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Throw away input that has arrived but not been read yet
    fn clear_input(&mut self) -> std::io::Result<()>;
}

// ============================================================================
// Link Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Wraps a port opened through the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(settings: &LinkSettings) -> Result<Self, serialport::Error> {
        let port = serialport::new(&settings.port_name, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        tracing::info!(
            port = %settings.port_name,
            baud = settings.baud_rate,
            "opened serial port ({:?}, {:?}, {:?})",
            settings.data_bits, settings.parity, settings.stop_bits
        );

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout).map_err(std::io::Error::other)?;
        self.port.read(buf)
    }

    fn clear_input(&mut self) -> std::io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(std::io::Error::other)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

/// Replays scripted input bytes and checks everything written against an
/// expected log when dropped. `None` in the input is a read timeout. Once
/// the input is used up the port reports itself closed. Late bytes sit in
/// the input buffer from a given read onwards until read or cleared.
#[cfg(test)]
pub struct MockSerialPort {
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    late: Vec<(usize, u8)>,
    write_log: Vec<u8>,
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(input: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: input,
            read_pos: 0,
            late: Vec::new(),
            write_log: Vec::new(),
            expected_writes,
        }
    }

    /// `byte` lands in the input buffer just before read number `read`
    pub fn with_late_byte(mut self, read: usize, byte: u8) -> Self {
        self.late.push((read, byte));
        self
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        if let Some(idx) = self.late.iter().position(|&(at, _)| at <= self.read_pos) {
            if !buf.is_empty() {
                buf[0] = self.late.remove(idx).1;
                return Ok(1);
            }
        }

        if self.read_pos >= self.read_buffer.len() {
            return Ok(0);
        }

        let next = self.read_buffer[self.read_pos];
        self.read_pos += 1;
        match next {
            Some(byte) if !buf.is_empty() => {
                buf[0] = byte;
                Ok(1)
            }
            Some(_) => Ok(0),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout",
            )),
        }
    }

    fn clear_input(&mut self) -> std::io::Result<()> {
        let read_pos = self.read_pos;
        self.late.retain(|&(at, _)| at > read_pos);
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed input bytes",
            self.read_buffer.len() - self.read_pos,
        );

        assert!(self.late.is_empty(), "MockSerialPort dropped with late bytes {:02X?}", self.late);

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
