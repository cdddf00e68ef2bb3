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

//! Staged loader uploads.
//!
//! BOOTSTRP is keyed in through the front panel and listens for the
//! stage-two loader (H89LDR2 or QUARTERSHIM), which arrives last byte first.
//! The final byte lands on top of BOOTSTRP's own last byte and hands control
//! over. QUARTERSHIM can in turn receive ABSLDR into floppy RAM.

use std::path::Path;
use tracing::info;
use crate::error::{Error, Result};
use crate::protocol::*;
use crate::session::Session;

/// A loader binary whose length has been checked against its stage.
pub struct LoaderImage {
    name: String,
    data: Vec<u8>,
}

impl LoaderImage {
    pub fn new(name: impl Into<String>, data: Vec<u8>, expected_size: usize) -> Result<Self> {
        let name = name.into();
        if data.len() != expected_size {
            return Err(Error::LoaderSize { name, expected: expected_size, actual: data.len() });
        }
        Ok(LoaderImage { name, data })
    }

    pub fn load(path: &Path, expected_size: usize) -> Result<Self> {
        let data = std::fs::read(path)?;
        LoaderImage::new(path.display().to_string(), data, expected_size)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderOutcome {
    /// Upload finished and the new stage answered
    Activated,
    /// The H89 said '?' mid-stream: a loader is already running
    AlreadyLoaded { sent: usize },
}

impl std::fmt::Display for LoaderOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderOutcome::Activated => write!(f, "H89 loader active and ready"),
            LoaderOutcome::AlreadyLoaded { sent } => {
                write!(f, "Already loaded? (H89 answered '?' after {} bytes)", sent)
            }
        }
    }
}

impl Session {
    /// Streams a stage-two loader into BOOTSTRP and checks that it came up.
    pub fn upload_stage_loader(&mut self, image: &LoaderImage) -> Result<LoaderOutcome> {
        if self.config.drain_before_upload {
            self.drain_input()?;
        }

        info!("Sending {} ({} bytes)", image.name(), image.len());

        // Reverse order; BOOTSTRP stores downward
        let mut sent = 0;
        for &byte in image.data.iter().rev() {
            if self.channel.bytes_available().map_err(Error::Disconnected)? > 0
                && self.read_reply()? == Some(QUERY)
            {
                info!("Already loaded? H89 answered after {} bytes", sent);
                return Ok(LoaderOutcome::AlreadyLoaded { sent });
            }
            self.write_raw(&[byte])?;
            sent += 1;
        }

        // Erase what is left of BOOTSTRP past the new loader
        self.write_raw(&[0u8; LOADER_PADDING])?;

        self.send_command(ALIVE)?;
        self.await_ack(QUERY)?;
        info!("H89 loader active and ready");
        Ok(LoaderOutcome::Activated)
    }

    /// Sends ABSLDR into floppy RAM through a running QUARTERSHIM.
    pub fn upload_abs_loader(&mut self, image: &LoaderImage) -> Result<()> {
        if image.len() != ABS_LOADER_SIZE {
            return Err(Error::LoaderSize {
                name: image.name().to_string(),
                expected: ABS_LOADER_SIZE,
                actual: image.len(),
            });
        }

        // H89LDR2 answers '?' here, so only QUARTERSHIM gets past this
        info!("Checking if QUARTERSHIM is running on H89");
        self.send_command(SHIM_READY)?;
        self.await_ack(SHIM_READY)?;

        let reversed: Vec<u8> = image.data.iter().rev().copied().collect();
        self.write_raw(&reversed)?;
        info!("{} bytes sent, awaiting confirmation from H89", reversed.len());

        self.await_ack(SHIM_READY)?;
        info!("ABSLDR confirmed");
        Ok(())
    }

    /// Has the running loader write itself to a bootable disk, formatted as volume 0.
    pub fn save_loader_to_disk(&mut self) -> Result<()> {
        self.require_loader()?;
        self.set_volume(0)?;
        self.send_command(SAVE_LOADER)?;
        self.await_ack(SAVE_LOADER)?;
        info!("H89LDR2 saved to bootable disk on H89");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
