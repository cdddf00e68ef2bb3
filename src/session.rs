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
use clap::ValueEnum;
use tracing::info;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::protocol::*;
use crate::serial::SerialPort;

/// Baud rates the H8-4 / H8-5 serial boards can be strapped for
pub const BAUD_RATES: [u32; 4] = [1200, 2400, 4800, 9600];

pub const DEFAULT_BAUD: u32 = 9600;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Which generation of the H89 loader is on the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Profile {
    /// H89LDR2 / QUARTERSHIM / ABSLDR
    #[default]
    Ldr2,
    /// H89LDR9
    Ldr9,
}

/// Knobs covering the behavioral differences between loader generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Byte written by the bounded liveness probe
    pub probe_command: u8,
    /// How many {C, volume, ack} round trips a volume query makes
    pub volume_query_rounds: u8,
    /// Probe the loader before writing an image
    pub probe_before_write: bool,
    /// Drain stray inbound bytes before uploading a loader
    pub drain_before_upload: bool,
    /// Bump the read error tally on every track rather than only on 'r' acks
    pub count_every_track: bool,
}

impl ProtocolConfig {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Ldr2 => ProtocolConfig {
                probe_command: ALIVE,
                volume_query_rounds: 2,
                probe_before_write: false,
                drain_before_upload: true,
                count_every_track: true,
            },
            Profile::Ldr9 => ProtocolConfig {
                probe_command: QUERY,
                volume_query_rounds: 2,
                probe_before_write: false,
                drain_before_upload: false,
                count_every_track: true,
            },
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig::for_profile(Profile::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub track_size: usize,
    pub track_count: usize,
}

impl Geometry {
    pub fn image_size(&self) -> usize {
        self.track_size * self.track_count
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry { track_size: TRACK_SIZE, track_count: TRACK_COUNT }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One open link to the H89 plus everything negotiated over it.
pub struct Session {
    pub(crate) channel: Box<dyn SerialPort>,
    baud: u32,
    pub(crate) read_timeout: Duration,
    pub(crate) config: ProtocolConfig,
    pub(crate) geometry: Geometry,
    pub(crate) volume: u8,
    interleave: u8,
    override_volume: bool,
    pub(crate) last_ack: Option<u8>,
    pub(crate) read_errors: u32,
    pub(crate) interrupt: Interrupt,
}

impl Session {
    pub fn new(channel: Box<dyn SerialPort>, baud: u32, config: ProtocolConfig) -> Self {
        Session {
            channel,
            baud,
            read_timeout: DEFAULT_READ_TIMEOUT,
            config,
            geometry: Geometry::default(),
            volume: 0,
            interleave: 1,
            override_volume: false,
            last_ack: None,
            read_errors: 0,
            interrupt: Interrupt::default(),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Swaps in a freshly opened link, e.g. after the old one went away.
    /// Negotiated state is kept; the remote end still holds it.
    pub fn replace_channel(&mut self, channel: Box<dyn SerialPort>) {
        self.channel = channel;
        self.last_ack = None;
        info!("Serial link replaced");
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Changes the link speed. Unsupported rates leave the current one in place.
    pub fn set_baud(&mut self, baud: u32) -> Result<()> {
        if !BAUD_RATES.contains(&baud) {
            return Err(Error::InvalidBaud(baud));
        }
        self.channel.set_baud_rate(baud)?;
        self.baud = baud;
        info!("Baud rate updated to {}", baud);
        Ok(())
    }

    pub fn interleave(&self) -> u8 {
        self.interleave
    }

    /// Chooses the 1:N sector interleave used when writing. Only 1, 2 and 3 exist.
    pub fn set_interleave(&mut self, factor: u8) -> Result<()> {
        if !(1..=3).contains(&factor) {
            return Err(Error::InvalidInterleave(factor));
        }
        self.interleave = factor;
        info!("Interleave set to 1:{}", factor);
        Ok(())
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_volume_overridden(&self) -> bool {
        self.override_volume
    }

    /// Uses `volume` instead of whatever the image or disk says.
    pub fn override_volume(&mut self, volume: u8) {
        self.override_volume = true;
        self.volume = volume;
    }

    /// Goes back to taking the volume from the image or the disk.
    pub fn use_image_volume(&mut self) {
        self.override_volume = false;
    }

    pub fn last_ack(&self) -> Option<u8> {
        self.last_ack
    }

    pub fn read_errors(&self) -> u32 {
        self.read_errors
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }
}

// ============================================================================
// Tests
// ============================================================================
