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

use tracing::{info, warn};
use crate::error::{Error, Result};
use crate::protocol::*;
use crate::session::Session;

/// Parses a volume number the user typed. Any integer is accepted and masked to 8 bits.
pub fn parse_volume(text: &str) -> std::result::Result<u8, String> {
    let text = text.trim();
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        text.parse::<i64>()
    };

    value
        .map(|v| (v & 0xFF) as u8)
        .map_err(|_| format!("Invalid volume: {}. Vol# must be a number", text))
}

/// Result of comparing the session volume against the one on the tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackVolumeCheck {
    pub session: u8,
    pub track: u8,
}

impl TrackVolumeCheck {
    pub fn matches(&self) -> bool {
        self.session == self.track
    }

    /// Turns a mismatch into the error that aborts a read.
    pub fn require_match(self) -> Result<()> {
        if self.matches() {
            Ok(())
        } else {
            Err(Error::VolumeMismatch { session: self.session, track: self.track })
        }
    }
}

impl Session {
    /// Tells the H89 which volume number to use: 'V', the raw byte, then waits for 'V'.
    pub fn set_volume(&mut self, volume: u8) -> Result<()> {
        self.send_command(VOLUME_SET)?;
        self.write_raw(&[volume])?;
        self.await_ack(VOLUME_SET)?;
        info!("H89 volume set to {}", volume);
        Ok(())
    }

    /// Asks the H89 for the volume of the disk in the drive.
    ///
    /// The round trip is made `volume_query_rounds` times (twice by default)
    /// and the last answer wins.
    pub fn query_disk_volume(&mut self) -> Result<u8> {
        for round in 0..self.config.volume_query_rounds.max(1) {
            self.send_command(VOLUME_QUERY)?;
            let Some(volume) = self.read_reply()? else {
                return Err(Error::NoVolumeResponse);
            };
            self.volume = volume;
            info!("Volume detected: {} (round {})", volume, round + 1);
            self.await_ack(VOLUME_QUERY)?;
        }
        Ok(self.volume)
    }

    /// Reads the volume recorded on the tracks and compares it to the session volume.
    pub fn check_track_volume(&mut self) -> Result<TrackVolumeCheck> {
        self.send_command(TRACK_VOLUME)?;
        let Some(track_volume) = self.read_reply()? else {
            return Err(Error::NoTrackVolumeResponse);
        };
        self.await_ack(TRACK_VOLUME)?;

        let check = TrackVolumeCheck { session: self.volume, track: track_volume };
        if !check.matches() {
            warn!("Vol# {} not = tracks Vol# = {}", check.session, check.track);
        }
        Ok(check)
    }

    /// Sends the session interleave: 'I', (factor - 1), then waits for 'I'.
    pub fn send_interleave(&mut self) -> Result<()> {
        let factor = self.interleave();
        info!("Sending interleave 1:{} to H89", factor);
        self.send_command(INTERLEAVE)?;
        self.write_raw(&[factor - 1])?;
        self.await_ack(INTERLEAVE)?;
        info!("Interleave accepted by H89");
        Ok(())
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
    fn test_parse_volume_masks_to_8_bits() {
        assert_eq!(parse_volume("0"), Ok(0));
        assert_eq!(parse_volume("255"), Ok(255));
        assert_eq!(parse_volume("256"), Ok(0));
        assert_eq!(parse_volume("300"), Ok(44));
        assert_eq!(parse_volume("-1"), Ok(255));
        assert_eq!(parse_volume(" 0x1FF "), Ok(0xFF));
        assert!(parse_volume("vol").is_err());
    }

    #[test]
    fn test_set_volume_every_value() {
        for v in 0..=255u8 {
            let mut s = session(vec![Some(b'V')], vec![b'V', v]);
            s.set_volume(v).unwrap();
        }
    }

    #[test]
    fn test_set_volume_waits_through_noise() {
        let mut s = session(vec![Some(b'?'), None, Some(b'V')], vec![b'V', 7]);
        s.set_volume(7).unwrap();
    }

    #[test]
    fn test_query_disk_volume_two_rounds_second_wins() {
        let mut s = session(
            vec![Some(3), Some(b'C'), Some(9), Some(b'C')],
            vec![b'C', b'C'],
        );
        assert_eq!(s.query_disk_volume().unwrap(), 9);
        assert_eq!(s.volume(), 9);
    }

    #[test]
    fn test_query_disk_volume_single_round_variant() {
        let mut s = session(vec![Some(3), Some(b'C')], vec![b'C']);
        s.config.volume_query_rounds = 1;
        assert_eq!(s.query_disk_volume().unwrap(), 3);
    }

    #[test]
    fn test_query_disk_volume_no_answer() {
        let mut s = session(vec![Some(3), Some(b'C'), None], vec![b'C', b'C']);
        assert!(matches!(s.query_disk_volume(), Err(Error::NoVolumeResponse)));
        // First round's answer stays
        assert_eq!(s.volume(), 3);
    }

    #[test]
    fn test_check_track_volume_match() {
        let mut s = session(vec![Some(0), Some(b'T')], vec![b'T']);
        let check = s.check_track_volume().unwrap();
        assert!(check.matches());
        assert!(check.require_match().is_ok());
    }

    #[test]
    fn test_check_track_volume_mismatch() {
        let mut s = session(vec![Some(12), Some(b'T')], vec![b'T']);
        s.override_volume(10);
        let check = s.check_track_volume().unwrap();
        assert_eq!(check, TrackVolumeCheck { session: 10, track: 12 });
        assert!(matches!(
            check.require_match(),
            Err(Error::VolumeMismatch { session: 10, track: 12 })
        ));
    }

    #[test]
    fn test_check_track_volume_no_answer() {
        let mut s = session(vec![None], vec![b'T']);
        assert!(matches!(s.check_track_volume(), Err(Error::NoTrackVolumeResponse)));
    }

    #[test]
    fn test_send_interleave() {
        let mut s = session(vec![Some(b'I')], vec![b'I', 2]);
        s.set_interleave(3).unwrap();
        s.send_interleave().unwrap();
    }
}
