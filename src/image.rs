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

//! Image files on the PC side.
//!
//! Whether a file is a source or a sink is decided once, when it is opened:
//! an existing file with data in it is only ever sent to the H89, anything
//! else is created and only ever filled from the H89. That keeps an existing
//! disk image from being clobbered by a read.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The file supplies bytes sent to the H89
    ToDevice,
    /// The file receives bytes read from the H89
    FromDevice,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ToDevice => write!(f, "for sending to the H89"),
            Direction::FromDevice => write!(f, "for receiving from the H89"),
        }
    }
}

pub struct ImageFile {
    path: PathBuf,
    file: Option<File>,
    direction: Direction,
}

impl ImageFile {
    /// Opens `path`, picking the direction from what is already on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existing = fs::metadata(&path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false);

        if existing {
            let file = File::open(&path)?;
            info!("Reading existing file of {} bytes", file.metadata()?.len());
            Ok(ImageFile { path, file: Some(file), direction: Direction::ToDevice })
        } else {
            let file = File::create(&path)?;
            info!("{} doesn't exist, creating it", path.display());
            Ok(ImageFile { path, file: Some(file), direction: Direction::FromDevice })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Fails with a usage error unless the file was opened `wanted`.
    pub fn require(&self, wanted: Direction) -> Result<()> {
        if self.direction != wanted {
            return Err(Error::WrongDirection { path: self.path.clone(), direction: self.direction });
        }
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.handle()?.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Reads the byte at `offset`, then rewinds. `None` if the file is shorter.
    pub fn byte_at(&mut self, offset: u64) -> Result<Option<u8>> {
        self.require(Direction::ToDevice)?;
        let file = self.handle()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 1];
        let n = file.read(&mut buf)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(if n == 1 { Some(buf[0]) } else { None })
    }

    /// Fills as much of `buf` as the file allows and returns how many bytes that was.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.require(Direction::ToDevice)?;
        let file = self.handle()?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        self.require(Direction::ToDevice)?;
        let mut data = Vec::new();
        self.handle()?.read_to_end(&mut data)?;
        Ok(data)
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.require(Direction::FromDevice)?;
        self.handle()?.write_all(data)?;
        Ok(())
    }

    /// Flushes and releases the handle. A receiving file that never got a
    /// byte is removed, since the transfer into it never started.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };

        file.flush()?;
        let empty = file.metadata()?.len() == 0;
        drop(file);

        if self.direction == Direction::FromDevice && empty {
            println!("Removing empty file \"{}\"", self.path.display());
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn handle(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("{} is already closed", self.path.display()),
            ))
        })
    }
}

impl Drop for ImageFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing {} failed: {}", self.path.display(), e);
        } else {
            debug!("Closed {}", self.path.display());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
