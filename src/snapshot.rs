//! Per-device xrun snapshot data model

use bitflags::bitflags;

/// Maximum number of channels captured per device; extra channels reported
/// by the driver are dropped without error.
pub const MAX_CHANNELS: usize = 64;

bitflags! {
    /// OSS channel capability mask, as reported in the `caps` attribute
    /// (subset of the `PCM_CAP_*` bits from sys/soundcard.h).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChanCaps: u64 {
        /// Channel can record
        const INPUT = 0x0001_0000;
        /// Channel can play
        const OUTPUT = 0x0002_0000;
    }
}

/// Direction of an audio channel, derived from its capability mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Recording (capture) channel
    Input,
    /// Playback channel
    Output,
}

impl Direction {
    /// Derive the direction from a capability mask: the input bit wins,
    /// everything else is treated as playback.
    pub fn from_caps(caps: ChanCaps) -> Self {
        if caps.contains(ChanCaps::INPUT) {
            Direction::Input
        } else {
            Direction::Output
        }
    }
}

/// One direction-specific audio stream endpoint and its cumulative xrun
/// counter. The counter only resets when the driver reloads, which this
/// tool does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Channel name, unique within a device at a given instant
    pub name: String,
    /// Playback or capture
    pub direction: Direction,
    /// Cumulative xrun count
    pub xruns: u64,
}

/// The state of one device at one poll tick.
///
/// Built fresh on every poll, immutable once built. In watch mode a
/// snapshot lives exactly one tick as the diff baseline before being
/// replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Unit number of the queried device
    pub unit: i32,
    /// Display name of the device (e.g. "pcm0:hdaa0")
    pub devname: String,
    /// Channels in discovery order, capped at [`MAX_CHANNELS`]
    pub channels: Vec<Channel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_caps() {
        assert_eq!(
            Direction::from_caps(ChanCaps::INPUT),
            Direction::Input
        );
        assert_eq!(
            Direction::from_caps(ChanCaps::OUTPUT),
            Direction::Output
        );
        // A duplex-capable channel counts as input
        assert_eq!(
            Direction::from_caps(ChanCaps::INPUT | ChanCaps::OUTPUT),
            Direction::Input
        );
        // No recognized bits at all defaults to playback
        assert_eq!(Direction::from_caps(ChanCaps::empty()), Direction::Output);
    }
}
