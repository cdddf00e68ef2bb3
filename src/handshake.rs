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

//! Single-byte command / echoed-letter handshake.
//!
//! Two kinds of wait live here and must stay separate. `await_ack` never
//! gives up: the H89 may spend arbitrarily long on a track before echoing.
//! `probe_alive` makes exactly one bounded read and is the only way to ask
//! whether a loader is listening without risking a hang.

use std::io::ErrorKind;
use tracing::{debug, warn};
use crate::error::{Error, Result};
use crate::protocol::{ack_matches, describe_byte};
use crate::session::Session;

impl Session {
    /// Writes one command byte.
    pub fn send_command(&mut self, command: u8) -> Result<()> {
        self.write_raw(&[command])?;
        debug!("Sent: {}", describe_byte(command));
        Ok(())
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.channel.write_all(bytes).map_err(Error::Disconnected)
    }

    /// One read bounded by the session's read timeout. `None` on timeout.
    pub fn read_reply(&mut self) -> Result<Option<u8>> {
        if self.interrupt.is_raised() {
            return Err(Error::Interrupted);
        }

        let mut buf = [0u8; 1];
        match self.channel.read_timeout(&mut buf, self.read_timeout) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(Error::Disconnected(e)),
        }
    }

    /// Reads one byte, riding out any number of read timeouts.
    pub fn read_byte_blocking(&mut self) -> Result<u8> {
        loop {
            if let Some(byte) = self.read_reply()? {
                return Ok(byte);
            }
        }
    }

    /// Blocks until the H89 echoes `expected`, compared with case folded away.
    ///
    /// Anything else is logged and skipped; there is no retry limit. The raw
    /// byte is returned and kept in `last_ack`, since its case carries the
    /// read-error flag on 'R'.
    pub fn await_ack(&mut self, expected: u8) -> Result<u8> {
        loop {
            let got = self.read_byte_blocking()?;
            self.last_ack = Some(got);

            if ack_matches(expected, got) {
                debug!("Received: {}", describe_byte(got));
                return Ok(got);
            }

            warn!(
                "Waiting for {}, got {}",
                describe_byte(expected),
                describe_byte(got)
            );
        }
    }

    /// Writes `command` and makes a single bounded read. Any reply at all counts.
    pub fn probe_alive(&mut self, command: u8) -> Result<bool> {
        self.send_command(command)?;
        match self.read_reply()? {
            Some(byte) => {
                debug!("Probe {} answered with {}", describe_byte(command), describe_byte(byte));
                Ok(true)
            }
            None => {
                debug!("Probe {} timed out", describe_byte(command));
                Ok(false)
            }
        }
    }

    /// `probe_alive` with the configured probe byte, as a precondition.
    pub(crate) fn require_loader(&mut self) -> Result<()> {
        let command = self.config.probe_command;
        if self.probe_alive(command)? {
            Ok(())
        } else {
            Err(Error::NotResponding { command: describe_byte(command) })
        }
    }

    /// Reads and discards whatever is already waiting inbound.
    pub fn drain_input(&mut self) -> Result<Vec<u8>> {
        let mut drained = Vec::new();
        while self.channel.bytes_available().map_err(Error::Disconnected)? > 0 {
            match self.read_reply()? {
                Some(byte) => drained.push(byte),
                None => break,
            }
        }

        if !drained.is_empty() {
            let shown: Vec<String> = drained.iter().map(|&b| describe_byte(b)).collect();
            debug!("Flushed serial input: {}", shown.join(" "));
        }
        Ok(drained)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;
    use crate::session::{ProtocolConfig, DEFAULT_BAUD};

    fn session(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Session {
        Session::new(
            Box::new(MockSerialPort::new(responses, expected_writes)),
            DEFAULT_BAUD,
            ProtocolConfig::default(),
        )
    }

    #[test]
    fn test_send_command_writes_one_byte() {
        let mut s = session(vec![], vec![b'V']);
        s.send_command(b'V').unwrap();
    }

    #[test]
    fn test_await_ack_returns_raw_byte() {
        let mut s = session(vec![Some(b'r')], vec![]);
        assert_eq!(s.await_ack(b'R').unwrap(), b'r');
        assert_eq!(s.last_ack(), Some(b'r'));
    }

    #[test]
    fn test_await_ack_skips_mismatches_and_timeouts() {
        let mut s = session(vec![None, Some(b'X'), None, None, Some(0x0D), Some(b'v')], vec![]);
        assert_eq!(s.await_ack(b'V').unwrap(), b'v');
    }

    #[test]
    fn test_await_ack_lost_connection() {
        let mut s = session(vec![Some(b'X')], vec![]);
        assert!(matches!(s.await_ack(b'V'), Err(Error::Disconnected(_))));
        assert_eq!(s.last_ack(), Some(b'X'));
    }

    #[test]
    fn test_await_ack_interrupted() {
        let mut s = session(vec![], vec![]);
        s.interrupt.raise();
        assert!(matches!(s.await_ack(b'V'), Err(Error::Interrupted)));
    }

    #[test]
    fn test_probe_alive_any_reply() {
        let mut s = session(vec![Some(b'?')], vec![b'A']);
        assert!(s.probe_alive(b'A').unwrap());
    }

    #[test]
    fn test_probe_alive_timeout() {
        let mut s = session(vec![None], vec![b'A']);
        assert!(!s.probe_alive(b'A').unwrap());
    }

    #[test]
    fn test_require_loader_not_responding() {
        let mut s = session(vec![None], vec![b'A']);
        let err = s.require_loader().unwrap_err();
        assert!(matches!(err, Error::NotResponding { .. }));
        assert!(!err.is_usage());
    }

    #[test]
    fn test_drain_input() {
        let port = MockSerialPort::new(vec![], vec![]).with_arrivals(vec![(0, b'x'), (0, b'?')]);
        let mut s = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        assert_eq!(s.drain_input().unwrap(), vec![b'x', b'?']);
        assert!(s.drain_input().unwrap().is_empty());
    }
}
