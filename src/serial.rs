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

use std::io::{Read, Write};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the loader protocol
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Number of inbound bytes that can be read without waiting
    fn bytes_available(&mut self) -> std::io::Result<usize>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> std::io::Result<()>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    /// Opens the port the way the H89 end expects it: 8 data bits, no parity, 2 stop bits.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .timeout(timeout)
            .open()?;

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
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }

    fn bytes_available(&mut self) -> std::io::Result<usize> {
        self.port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> std::io::Result<()> {
        self.port.set_baud_rate(baud_rate)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Unsolicited bytes: (bytes written so far before it shows up, byte)
    arrivals: Vec<(usize, u8)>,
    arrival_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            arrivals: Vec::new(),
            arrival_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }

    /// Queues bytes that become readable (and counted by `bytes_available`)
    /// once `after_writes` bytes have been written. Ordered by `after_writes`.
    pub fn with_arrivals(mut self, arrivals: Vec<(usize, u8)>) -> Self {
        self.arrivals = arrivals;
        self
    }

    fn arrived(&self) -> usize {
        self.arrivals[self.arrival_pos..]
            .iter()
            .take_while(|(after, _)| *after <= self.write_log.len())
            .count()
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Unsolicited bytes that have already arrived are read first
        if self.arrived() > 0 {
            buf[0] = self.arrivals[self.arrival_pos].1;
            self.arrival_pos += 1;
            return Ok(1);
        }

        // Out of responses = the far end went away, so an unbounded wait fails fast
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Mock exhausted"
            ));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }

    fn bytes_available(&mut self) -> std::io::Result<usize> {
        Ok(self.arrived())
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> std::io::Result<()> {
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
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            self.arrival_pos,
            self.arrivals.len(),
            "MockSerialPort dropped with {} unconsumed unsolicited bytes",
            self.arrivals.len() - self.arrival_pos
        );

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
