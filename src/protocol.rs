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

//! H89 loader protocol constants

// ============================================================================
// Command Alphabet
// ============================================================================

/// Volume - followed by one raw volume byte, echoed back when stored
pub const VOLUME_SET: u8 = b'V';

/// Check volume - remote replies with the disk's volume byte, then 'C'
pub const VOLUME_QUERY: u8 = b'C';

/// Track volume - remote replies with the volume found on the tracks, then 'T'
pub const TRACK_VOLUME: u8 = b'T';

/// Read - transfer-start marker, then once per track; ack is 'r' on a read error
pub const READ_TRACK: u8 = b'R';

/// Write - transfer-start marker, then once per track ahead of its data
pub const WRITE_TRACK: u8 = b'W';

/// Interleave - followed by (factor - 1) as a raw byte
pub const INTERLEAVE: u8 = b'I';

/// Save - write the running stage-two loader to a bootable disk
pub const SAVE_LOADER: u8 = b'S';

/// Liveness probe understood by H89LDR2
pub const ALIVE: u8 = b'A';

/// Liveness probe understood by H89LDR9; also the "already loaded" reply
pub const QUERY: u8 = b'?';

/// Probe and confirmation letter of QUARTERSHIM while it receives ABSLDR
pub const SHIM_READY: u8 = b'F';

/// Probe and confirmation letter of ABSLDR while it receives an ABS file
pub const ABS_READY: u8 = b'B';

// ============================================================================
// Disk Geometry
// ============================================================================

/// Bytes per track (hard-sectored, 10 x 256)
pub const TRACK_SIZE: usize = 0x0A00;

/// Tracks per disk
pub const TRACK_COUNT: usize = 40;

/// Bytes in a complete image
pub const IMAGE_SIZE: usize = TRACK_SIZE * TRACK_COUNT;

/// Offset of the HDOS volume number inside an image
pub const IMAGE_VOLUME_OFFSET: u64 = 0x900;

// ============================================================================
// Remote Memory Map
// ============================================================================

/// BOOTSTRP, keyed in by hand
pub const BOOTSTRAP_BEGIN: u16 = 0x2300;
pub const BOOTSTRAP_END: u16 = 0x2329;

/// Stage-two loader (H89LDR2 or QUARTERSHIM); starts on BOOTSTRP's last byte
pub const STAGE_TWO_BEGIN: u16 = 0x2329;
pub const STAGE_TWO_END: u16 = 0x265B;

/// Floppy RAM, home of ABSLDR
pub const FLOPPY_RAM_BEGIN: u16 = 0x1400;
pub const FLOPPY_RAM_END: u16 = 0x17FF;

/// Stage-two loader image size (818 bytes)
pub const STAGE_TWO_SIZE: usize = (STAGE_TWO_END - STAGE_TWO_BEGIN) as usize;

/// ABSLDR image size, fills floppy RAM exactly
pub const ABS_LOADER_SIZE: usize = (FLOPPY_RAM_END - FLOPPY_RAM_BEGIN) as usize + 1;

/// Zero bytes sent after a stage-two upload to erase the rest of BOOTSTRP
pub const LOADER_PADDING: usize = 40;

// ============================================================================
// Helpers
// ============================================================================

/// Folds the 0x20 bit away, the way the loaders compare replies.
pub fn fold(byte: u8) -> u8 {
    byte & !0x20
}

/// True when `got` answers `expected` once case is folded away.
pub fn ack_matches(expected: u8, got: u8) -> bool {
    fold(expected) == fold(got)
}

/// Renders a byte for diagnostics: `'A' (41H)`, or `(0DH)` when unprintable.
pub fn describe_byte(byte: u8) -> String {
    if byte.is_ascii_graphic() || byte == b' ' {
        format!("'{}' ({:02X}H)", byte as char, byte)
    } else {
        format!("({:02X}H)", byte)
    }
}

// ============================================================================
// Tests
// ============================================================================
