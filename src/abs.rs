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

//! ABS executables, sent to ABSLDR running in floppy RAM.

use tracing::{info, warn};
use crate::error::{Error, Result};
use crate::image::{Direction, ImageFile};
use crate::protocol::*;
use crate::session::Session;

pub const ABS_HEADER_SIZE: usize = 8;

/// Magic numbers ABSLDR accepts
pub const ABS_MAGIC: [u16; 2] = [0x00FF, 0x01FF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsHeader {
    pub magic: u16,
    pub load_address: u16,
    pub length: u16,
    pub entry_point: u16,
}

impl AbsHeader {
    /// Parses the four little-endian words at the start of an ABS file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ABS_HEADER_SIZE {
            return Err(Error::AbsTooShort(data.len()));
        }

        let word = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
        Ok(AbsHeader {
            magic: word(0),
            load_address: word(2),
            length: word(4),
            entry_point: word(6),
        })
    }

    /// Last address the program occupies. Wider than 16 bits so a program
    /// running off the top of memory can be seen.
    pub fn end_address(&self) -> u32 {
        (self.load_address as u32 + self.length as u32).saturating_sub(1).max(self.load_address as u32)
    }

    pub fn check_magic(&self) -> Result<()> {
        if ABS_MAGIC.contains(&self.magic) {
            Ok(())
        } else {
            Err(Error::BadMagic(self.magic))
        }
    }

    fn overlaps(&self, begin: u16, end: u16) -> bool {
        self.load_address as u32 <= end as u32 && self.end_address() >= begin as u32
    }

    /// Everything worth telling the user about where this program lands.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut found = Vec::new();

        if self.end_address() > 0xFFFF {
            found.push(Diagnostic::Beyond64K);
        }
        if self.overlaps(FLOPPY_RAM_BEGIN, FLOPPY_RAM_END) {
            found.push(Diagnostic::OverwritesAbsLoader);
        }
        if self.overlaps(BOOTSTRAP_BEGIN, BOOTSTRAP_END) {
            found.push(Diagnostic::OverwritesBootstrap);
        }
        if self.overlaps(STAGE_TWO_BEGIN, STAGE_TWO_END) {
            found.push(Diagnostic::OverwritesStageTwo);
        }

        let entry = self.entry_point as u32;
        if self.entry_point == FLOPPY_RAM_BEGIN {
            found.push(Diagnostic::Multipart);
        } else if entry < self.load_address as u32 || entry > self.end_address() {
            found.push(Diagnostic::EntryOutsideProgram);
        }

        found
    }
}

impl std::fmt::Display for AbsHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Magic: {:04X}H, Load Addr: {:04X}H, Length: {:04X}H, Entry: {:04X}H",
            self.magic, self.load_address, self.length, self.entry_point
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Note,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Beyond64K,
    OverwritesAbsLoader,
    OverwritesBootstrap,
    OverwritesStageTwo,
    Multipart,
    EntryOutsideProgram,
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::Beyond64K
            | Diagnostic::OverwritesAbsLoader
            | Diagnostic::EntryOutsideProgram => Severity::Warning,
            Diagnostic::OverwritesBootstrap
            | Diagnostic::OverwritesStageTwo
            | Diagnostic::Multipart => Severity::Note,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::Beyond64K => write!(f, "This writes beyond 64K of RAM!"),
            Diagnostic::OverwritesAbsLoader => {
                write!(f, "This overwrites ABSLDR ({:04X}H) and will fail!", FLOPPY_RAM_BEGIN)
            }
            Diagnostic::OverwritesBootstrap => {
                write!(f, "This overwrites BOOTSTRP ({:04X}H).", BOOTSTRAP_BEGIN)
            }
            Diagnostic::OverwritesStageTwo => {
                write!(f, "This overwrites QUARTERSHIM ({:04X}H).", STAGE_TWO_BEGIN)
            }
            Diagnostic::Multipart => write!(f, "This multipart file runs ABSLDR again."),
            Diagnostic::EntryOutsideProgram => {
                write!(f, "Transfers control to an entry point outside the program.")
            }
        }
    }
}

/// Outcome of sending an ABS file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsReport {
    pub header: AbsHeader,
    pub bytes: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl std::fmt::Display for AbsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.header)?;
        for diagnostic in &self.diagnostics {
            let label = match diagnostic.severity() {
                Severity::Note => "NOTE",
                Severity::Warning => "WARNING",
            };
            writeln!(f, "    {}: {}", label, diagnostic)?;
        }
        write!(f, "{} bytes sent and confirmed by ABSLDR", self.bytes)
    }
}

impl Session {
    /// Sends the whole ABS file, header included, to a running ABSLDR.
    ///
    /// Only a bad magic number stops the transfer; the placement diagnostics
    /// are reported and the file goes out anyway.
    pub fn send_abs(&mut self, image: &mut ImageFile) -> Result<AbsReport> {
        image.require(Direction::ToDevice)?;
        image.rewind()?;
        let data = image.read_to_end()?;
        info!("File size: {}", data.len());

        let header = AbsHeader::parse(&data)?;
        info!("{}", header);

        let diagnostics = header.diagnostics();
        for diagnostic in &diagnostics {
            match diagnostic.severity() {
                Severity::Warning => warn!("{}", diagnostic),
                Severity::Note => info!("{}", diagnostic),
            }
        }
        header.check_magic()?;

        // H89LDR2 answers '?' here, so only ABSLDR gets past this
        info!("Checking if ABSLDR is running on H89");
        self.send_command(ABS_READY)?;
        self.await_ack(ABS_READY)?;

        info!("Sending {} to H89", image.path().display());
        self.write_raw(&data)?;
        info!("{} bytes sent, awaiting confirmation from H89", data.len());
        self.await_ack(ABS_READY)?;

        Ok(AbsReport { header, bytes: data.len(), diagnostics })
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

    fn header(magic: u16, load: u16, length: u16, entry: u16) -> AbsHeader {
        AbsHeader { magic, load_address: load, length, entry_point: entry }
    }

    fn abs_file(header: &AbsHeader, body_len: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for word in [header.magic, header.load_address, header.length, header.entry_point] {
            data.extend_from_slice(&word.to_le_bytes());
        }
        data.extend((0..body_len).map(|i| (i * 3) as u8));
        data
    }

    #[test]
    fn test_parse_header() {
        let parsed = AbsHeader::parse(&[0xFF, 0x00, 0x00, 0x14, 0x00, 0x01, 0x00, 0x14]).unwrap();
        assert_eq!(parsed, header(0x00FF, 0x1400, 0x0100, 0x1400));
        assert_eq!(parsed.end_address(), 0x14FF);
        assert!(parsed.check_magic().is_ok());

        let diagnostics = parsed.diagnostics();
        assert!(diagnostics.contains(&Diagnostic::Multipart));
        assert!(!diagnostics.contains(&Diagnostic::EntryOutsideProgram));
        assert!(!diagnostics.contains(&Diagnostic::Beyond64K));
    }

    #[test]
    fn test_parse_too_short() {
        let err = AbsHeader::parse(&[0xFF, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, Error::AbsTooShort(3)));
        assert!(err.is_usage());
    }

    #[test]
    fn test_magic() {
        assert!(header(0x01FF, 0, 0, 0).check_magic().is_ok());
        assert!(matches!(header(0x1234, 0, 0, 0).check_magic(), Err(Error::BadMagic(0x1234))));
    }

    #[test]
    fn test_clean_program_has_no_diagnostics() {
        assert!(header(0x00FF, 0x4000, 0x1000, 0x4000).diagnostics().is_empty());
    }

    #[test]
    fn test_entry_outside_program() {
        let diagnostics = header(0x00FF, 0x4000, 0x0100, 0x5000).diagnostics();
        assert_eq!(diagnostics, vec![Diagnostic::EntryOutsideProgram]);
        assert_eq!(diagnostics[0].severity(), Severity::Warning);
    }

    #[test]
    fn test_beyond_64k() {
        let diagnostics = header(0x00FF, 0xFF00, 0x0200, 0xFF00).diagnostics();
        assert_eq!(diagnostics, vec![Diagnostic::Beyond64K]);
    }

    #[test]
    fn test_overwrites_loaders() {
        let diagnostics = header(0x00FF, 0x2000, 0x0400, 0x2000).diagnostics();
        assert!(diagnostics.contains(&Diagnostic::OverwritesBootstrap));
        assert!(diagnostics.contains(&Diagnostic::OverwritesStageTwo));
        assert!(!diagnostics.contains(&Diagnostic::OverwritesAbsLoader));
        assert_eq!(Diagnostic::OverwritesBootstrap.severity(), Severity::Note);
    }

    #[test]
    fn test_send_abs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PROG.ABS");
        let data = abs_file(&header(0x00FF, 0x4000, 0x0020, 0x4000), 0x20);
        std::fs::write(&path, &data).unwrap();

        let mut expected_writes = vec![ABS_READY];
        expected_writes.extend_from_slice(&data);

        let port = MockSerialPort::new(vec![Some(QUERY), Some(ABS_READY), Some(b'b')], expected_writes);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        let mut image = ImageFile::open(&path).unwrap();

        let report = session.send_abs(&mut image).unwrap();
        assert_eq!(report.bytes, data.len());
        assert_eq!(report.header.load_address, 0x4000);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_send_abs_bad_magic_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("NOTABS.BIN");
        std::fs::write(&path, abs_file(&header(0xC3C3, 0x4000, 0x10, 0x4000), 0x10)).unwrap();

        let port = MockSerialPort::new(vec![], vec![]);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        let mut image = ImageFile::open(&path).unwrap();

        let err = session.send_abs(&mut image).unwrap_err();
        assert!(matches!(err, Error::BadMagic(0xC3C3)));
        assert!(err.is_usage());
    }

    #[test]
    fn test_send_abs_refuses_sink_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.abs");

        let port = MockSerialPort::new(vec![], vec![]);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        let mut image = ImageFile::open(&path).unwrap();

        assert!(matches!(session.send_abs(&mut image), Err(Error::WrongDirection { .. })));
    }
}
