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

use std::marker::PhantomData;
use tracing::{debug, info, warn};
use crate::error::{Error, Result};
use crate::image::{Direction, ImageFile};
use crate::protocol::*;
use crate::session::Session;

// ============================================================================
// Report
// ============================================================================

/// Outcome of writing a disk image to the H89.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub tracks: usize,
    pub bytes: usize,
    pub volume: u8,
    pub interleave: u8,
}

impl std::fmt::Display for WriteReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Disk write complete: {} tracks, {} bytes, volume {}, interleave 1:{}",
            self.tracks, self.bytes, self.volume, self.interleave
        )
    }
}

// ============================================================================
// States
// ============================================================================

pub struct ProbeLoader;
pub struct AnnounceVolume;
pub struct SendInterleave;
pub struct StartTransfer;
pub struct TransmitTrack;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    session: &'a mut Session,
    image: &'a mut ImageFile,
    track: usize,
    buffer: Vec<u8>,
}

pub enum SenderStep<'a> {
    Next(Box<dyn SenderState<'a> + 'a>),
    Done(WriteReport),
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState<'a> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> SenderFsm<'a, S> {
    fn transition<T>(self) -> Box<SenderFsm<'a, T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            session: self.session,
            image: self.image,
            track: self.track,
            buffer: self.buffer,
        })
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, ProbeLoader> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let mut fsm = *self;
        fsm.session.require_loader()?;
        Ok(SenderStep::Next(fsm.transition::<AnnounceVolume>()))
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, AnnounceVolume> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let mut fsm = *self;

        let volume = if fsm.session.is_volume_overridden() {
            debug!("Using override volume {}", fsm.session.volume);
            fsm.session.volume
        } else {
            match fsm.image.byte_at(IMAGE_VOLUME_OFFSET)? {
                Some(volume) => {
                    info!("Image file's volume#: {}", volume);
                    fsm.session.volume = volume;
                    volume
                }
                None => {
                    warn!("Image too short to carry a volume#, keeping {}", fsm.session.volume);
                    fsm.session.volume
                }
            }
        };

        fsm.session.set_volume(volume)?;
        Ok(SenderStep::Next(fsm.transition::<SendInterleave>()))
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendInterleave> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let mut fsm = *self;
        fsm.session.send_interleave()?;
        Ok(SenderStep::Next(fsm.transition::<StartTransfer>()))
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, StartTransfer> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let mut fsm = *self;
        info!("Writing {} to the H89 floppy drive", fsm.image.path().display());

        fsm.image.rewind()?;
        fsm.session.send_command(WRITE_TRACK)?;
        Ok(SenderStep::Next(fsm.transition::<TransmitTrack>()))
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, TransmitTrack> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let mut fsm = *self;
        let geometry = fsm.session.geometry;
        info!("Writing track {}", fsm.track);

        fsm.buffer.resize(geometry.track_size, 0);
        let got = fsm.image.read_chunk(&mut fsm.buffer)?;
        if got != geometry.track_size {
            return Err(Error::ShortTrack { track: fsm.track, got, expected: geometry.track_size });
        }

        fsm.session.send_command(WRITE_TRACK)?;
        fsm.session.write_raw(&fsm.buffer)?;
        fsm.session.await_ack(WRITE_TRACK)?;
        fsm.track += 1;

        if fsm.track < geometry.track_count {
            return Ok(SenderStep::Next(Box::new(fsm)));
        }

        Ok(SenderStep::Done(WriteReport {
            tracks: fsm.track,
            bytes: fsm.track * geometry.track_size,
            volume: fsm.session.volume,
            interleave: fsm.session.interleave(),
        }))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> SenderFsm<'a, ProbeLoader> {
    /// Refuses a file that was opened for receiving before anything goes out on the wire.
    /// The liveness probe is only part of the run when the profile asks for it.
    pub fn new(session: &'a mut Session, image: &'a mut ImageFile) -> Result<Box<dyn SenderState<'a> + 'a>> {
        image.require(Direction::ToDevice)?;
        let probe = session.config.probe_before_write;
        let track_size = session.geometry.track_size;

        let fsm = SenderFsm {
            state: PhantomData::<ProbeLoader>,
            session,
            image,
            track: 0,
            buffer: Vec::with_capacity(track_size),
        };

        let state: Box<dyn SenderState<'a> + 'a> = if probe {
            Box::new(fsm)
        } else {
            fsm.transition::<AnnounceVolume>()
        };
        Ok(state)
    }
}

impl Session {
    /// Writes a whole disk image from `image` to the floppy in the H89.
    pub fn write_image(&mut self, image: &mut ImageFile) -> Result<WriteReport> {
        let mut state = SenderFsm::new(self, image)?;

        loop {
            match state.step()? {
                SenderStep::Next(next_state) => state = next_state,
                SenderStep::Done(report) => return Ok(report),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
