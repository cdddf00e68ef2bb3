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

use std::path::PathBuf;
use thiserror::Error;
use crate::image::Direction;

/// Everything a session operation can fail with.
#[derive(Error, Debug)]
pub enum Error {
    // Usage errors, raised before the device is touched

    #[error("\"{}\" is opened {}", .path.display(), .direction)]
    WrongDirection { path: PathBuf, direction: Direction },

    #[error("{name} is {actual} bytes, expected {expected}")]
    LoaderSize { name: String, expected: usize, actual: usize },

    #[error("ABS file is {0} bytes, too short for its 8-byte header")]
    AbsTooShort(usize),

    #[error("not an ABS file: magic should be 00FFH or 01FFH, not {0:04X}H")]
    BadMagic(u16),

    #[error("{0} baud is not supported (1200, 2400, 4800 or 9600)")]
    InvalidBaud(u32),

    #[error("interleave 1:{0} is not supported (1:1, 1:2 or 1:3)")]
    InvalidInterleave(u8),

    // Liveness failures

    #[error("H89 is not responding to {command}; load the loader and check cables")]
    NotResponding { command: String },

    #[error("no volume response from H89")]
    NoVolumeResponse,

    #[error("no track volume response from H89")]
    NoTrackVolumeResponse,

    #[error("volume {session} does not match the tracks' volume {track}")]
    VolumeMismatch { session: u8, track: u8 },

    // Fatal stream errors

    #[error("short read on track {track}: got {got} of {expected} bytes from the image")]
    ShortTrack { track: usize, got: usize, expected: usize },

    #[error("connection lost: {0}")]
    Disconnected(std::io::Error),

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the operation was rejected before any device I/O.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::WrongDirection { .. }
                | Error::LoaderSize { .. }
                | Error::AbsTooShort(_)
                | Error::BadMagic(_)
                | Error::InvalidBaud(_)
                | Error::InvalidInterleave(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
