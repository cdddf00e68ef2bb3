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
use crate::error::Result;
use crate::image::{Direction, ImageFile};
use crate::protocol::*;
use crate::session::Session;

// ============================================================================
// Report
// ============================================================================

/// Outcome of reading a disk image from the H89.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReport {
    pub tracks: usize,
    pub bytes: usize,
    /// The session's read error tally after the run
    pub read_errors: u32,
    /// Tracks whose 'R' came back lowercase
    pub flagged_tracks: Vec<usize>,
}

impl std::fmt::Display for ReadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Read complete: {} tracks, {} bytes", self.tracks, self.bytes)?;
        if self.read_errors > 0 {
            let s = if self.read_errors == 1 { "" } else { "s" };
            write!(f, "\n  WARNING: {} Read Error{}", self.read_errors, s)?;
        }
        if !self.flagged_tracks.is_empty() {
            write!(f, "\n  Tracks flagged by the H89: {:?}", self.flagged_tracks)?;
        }
        Ok(())
    }
}

// ============================================================================
// States
// ============================================================================

pub struct ProbeLoader;
pub struct QueryVolume;
pub struct CheckTrackVolume;
pub struct StartTransfer;
pub struct ReceiveTrack;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<'a, State> {
    state: PhantomData<State>,
    session: &'a mut Session,
    image: &'a mut ImageFile,
    track: usize,
    buffer: Vec<u8>,
    flagged_tracks: Vec<usize>,
}

pub enum ReceiverStep<'a> {
    Next(Box<dyn ReceiverState<'a> + 'a>),
    Done(ReadReport),
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState<'a> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S> ReceiverFsm<'a, S> {
    fn transition<T>(self) -> Box<ReceiverFsm<'a, T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            session: self.session,
            image: self.image,
            track: self.track,
            buffer: self.buffer,
            flagged_tracks: self.flagged_tracks,
        })
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ProbeLoader> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let mut fsm = *self;
        fsm.session.require_loader()?;

        if fsm.session.is_volume_overridden() {
            debug!("Volume overridden, skipping disk volume checks");
            Ok(ReceiverStep::Next(fsm.transition::<StartTransfer>()))
        } else {
            Ok(ReceiverStep::Next(fsm.transition::<QueryVolume>()))
        }
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, QueryVolume> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let mut fsm = *self;
        let volume = fsm.session.query_disk_volume()?;
        info!("Volume on disk identified as: {}", volume);
        Ok(ReceiverStep::Next(fsm.transition::<CheckTrackVolume>()))
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, CheckTrackVolume> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let mut fsm = *self;
        fsm.session.check_track_volume()?.require_match()?;
        Ok(ReceiverStep::Next(fsm.transition::<StartTransfer>()))
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, StartTransfer> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let mut fsm = *self;
        info!(
            "Receiving disk ({} bytes) into {} from the H89",
            fsm.session.geometry.image_size(),
            fsm.image.path().display()
        );

        fsm.session.read_errors = 0;
        fsm.session.send_command(READ_TRACK)?;
        Ok(ReceiverStep::Next(fsm.transition::<ReceiveTrack>()))
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReceiveTrack> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let mut fsm = *self;
        let geometry = fsm.session.geometry;
        info!("Receiving track {}", fsm.track);

        fsm.session.send_command(READ_TRACK)?;

        fsm.buffer.clear();
        for _ in 0..geometry.track_size {
            let byte = fsm.session.read_byte_blocking()?;
            fsm.buffer.push(byte);
        }

        let ack = fsm.session.await_ack(READ_TRACK)?;
        let flagged = ack == READ_TRACK.to_ascii_lowercase();
        if flagged {
            warn!("Read error was detected on track {}", fsm.track);
            fsm.flagged_tracks.push(fsm.track);
        }
        // With count_every_track every track bumps the tally, flagged or not
        if flagged || fsm.session.config.count_every_track {
            fsm.session.read_errors += 1;
        }

        fsm.image.append(&fsm.buffer)?;
        fsm.track += 1;

        if fsm.track < geometry.track_count {
            return Ok(ReceiverStep::Next(Box::new(fsm)));
        }

        Ok(ReceiverStep::Done(ReadReport {
            tracks: fsm.track,
            bytes: fsm.track * geometry.track_size,
            read_errors: fsm.session.read_errors,
            flagged_tracks: fsm.flagged_tracks,
        }))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> ReceiverFsm<'a, ProbeLoader> {
    /// Refuses a file that was opened for sending before anything goes out on the wire.
    pub fn new(session: &'a mut Session, image: &'a mut ImageFile) -> Result<Box<dyn ReceiverState<'a> + 'a>> {
        image.require(Direction::FromDevice)?;
        let track_size = session.geometry.track_size;

        Ok(Box::new(ReceiverFsm {
            state: PhantomData::<ProbeLoader>,
            session,
            image,
            track: 0,
            buffer: Vec::with_capacity(track_size),
            flagged_tracks: Vec::new(),
        }))
    }
}

impl Session {
    /// Reads a whole disk from the H89 into `image`, track by track.
    pub fn read_image(&mut self, image: &mut ImageFile) -> Result<ReadReport> {
        let mut state = ReceiverFsm::new(self, image)?;

        loop {
            match state.step()? {
                ReceiverStep::Next(next_state) => state = next_state,
                ReceiverStep::Done(report) => return Ok(report),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::serial::MockSerialPort;
    use crate::session::{Geometry, ProtocolConfig, DEFAULT_BAUD};

    fn track_data(track: usize, size: usize) -> Vec<u8> {
        (0..size).map(|i| (track * 31 + i) as u8).collect()
    }

    /// Replies for the track loop: data then the ack for each track.
    fn track_replies(geometry: Geometry, acks: &[u8]) -> Vec<Option<u8>> {
        let mut responses = Vec::new();
        for track in 0..geometry.track_count {
            responses.extend(track_data(track, geometry.track_size).into_iter().map(Some));
            responses.push(Some(acks[track]));
        }
        responses
    }

    fn track_writes(geometry: Geometry) -> Vec<u8> {
        let mut writes = vec![READ_TRACK];
        writes.extend(std::iter::repeat_n(READ_TRACK, geometry.track_count));
        writes
    }

    fn expected_image(geometry: Geometry) -> Vec<u8> {
        (0..geometry.track_count).flat_map(|t| track_data(t, geometry.track_size)).collect()
    }

    #[test]
    fn test_read_full_disk() {
        let geometry = Geometry::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let mut responses = vec![
            Some(b'?'),          // probe answered
            Some(0), Some(b'C'), // volume query, round 1
            Some(0), Some(b'C'), // volume query, round 2
            Some(0), Some(b'T'), // track volume
        ];
        let mut acks = vec![READ_TRACK; geometry.track_count];
        acks[7] = b'r';
        responses.extend(track_replies(geometry, &acks));

        let mut expected_writes = vec![ALIVE, VOLUME_QUERY, VOLUME_QUERY, TRACK_VOLUME];
        expected_writes.extend(track_writes(geometry));

        let port = MockSerialPort::new(responses, expected_writes);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        let mut image = ImageFile::open(&path).unwrap();

        let report = session.read_image(&mut image).unwrap();
        image.close().unwrap();

        assert_eq!(report.tracks, 40);
        assert_eq!(report.bytes, IMAGE_SIZE);
        assert_eq!(report.flagged_tracks, vec![7]);
        // Every track counts
        assert_eq!(report.read_errors, 40);
        assert_eq!(session.read_errors(), 40);

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 102400);
        assert_eq!(written, expected_image(geometry));
    }

    #[test]
    fn test_read_counts_flagged_only() {
        let geometry = Geometry { track_size: 4, track_count: 3 };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.img");

        let mut responses = vec![Some(b'?')];
        responses.extend(track_replies(geometry, &[b'r', b'R', b'r']));

        let mut expected_writes = vec![ALIVE];
        expected_writes.extend(track_writes(geometry));

        let port = MockSerialPort::new(responses, expected_writes);
        let mut config = ProtocolConfig::default();
        config.count_every_track = false;
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, config).with_geometry(geometry);
        session.override_volume(5);

        let mut image = ImageFile::open(&path).unwrap();
        let report = session.read_image(&mut image).unwrap();

        assert_eq!(report.read_errors, 2);
        assert_eq!(report.flagged_tracks, vec![0, 2]);
        drop(image);
        assert_eq!(std::fs::read(&path).unwrap(), expected_image(geometry));
    }

    #[test]
    fn test_read_skips_ack_noise() {
        let geometry = Geometry { track_size: 2, track_count: 1 };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.img");

        let responses = vec![Some(b'?'), Some(0xAA), None, Some(0xBB), Some(b'W'), None, Some(b'R')];
        let port = MockSerialPort::new(responses, vec![ALIVE, READ_TRACK, READ_TRACK]);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default())
            .with_geometry(geometry);
        session.override_volume(0);

        let mut image = ImageFile::open(&path).unwrap();
        let report = session.read_image(&mut image).unwrap();
        assert!(report.flagged_tracks.is_empty());
        drop(image);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_read_refuses_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.img");
        std::fs::write(&path, b"keep me").unwrap();

        let port = MockSerialPort::new(vec![], vec![]);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        let mut image = ImageFile::open(&path).unwrap();

        let err = session.read_image(&mut image).unwrap_err();
        assert!(err.is_usage());
        drop(image);
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_read_loader_not_responding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.img");

        let port = MockSerialPort::new(vec![None], vec![ALIVE]);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        let mut image = ImageFile::open(&path).unwrap();

        assert!(matches!(session.read_image(&mut image), Err(Error::NotResponding { .. })));
        drop(image);
        // Nothing was received, so the empty file goes away
        assert!(!path.exists());
    }

    #[test]
    fn test_read_volume_mismatch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mismatch.img");

        let responses = vec![
            Some(b'?'),
            Some(4), Some(b'C'),
            Some(4), Some(b'C'),
            Some(9), Some(b'T'),
        ];
        let port = MockSerialPort::new(responses, vec![ALIVE, VOLUME_QUERY, VOLUME_QUERY, TRACK_VOLUME]);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default());
        let mut image = ImageFile::open(&path).unwrap();

        assert!(matches!(
            session.read_image(&mut image),
            Err(Error::VolumeMismatch { session: 4, track: 9 })
        ));
    }

    #[test]
    fn test_read_disconnect_mid_track() {
        let geometry = Geometry { track_size: 8, track_count: 2 };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.img");

        let mut responses = vec![Some(b'?')];
        responses.extend(track_data(0, 8).into_iter().map(Some));
        responses.push(Some(b'R'));
        responses.extend([Some(1), Some(2)]);

        let port = MockSerialPort::new(responses, vec![ALIVE, READ_TRACK, READ_TRACK, READ_TRACK]);
        let mut session = Session::new(Box::new(port), DEFAULT_BAUD, ProtocolConfig::default())
            .with_geometry(geometry);
        session.override_volume(0);
        let mut image = ImageFile::open(&path).unwrap();

        assert!(matches!(session.read_image(&mut image), Err(Error::Disconnected(_))));
        drop(image);
        // First track made it to disk
        assert_eq!(std::fs::read(&path).unwrap(), track_data(0, 8));
    }
}
