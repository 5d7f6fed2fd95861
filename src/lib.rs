//! Audio xrun monitor for the FreeBSD sound subsystem
//!
//! Polls /dev/sndstat for per-channel buffer underrun/overrun ("xrun")
//! counters on one audio device and reports them, either as a one-shot
//! snapshot or as a continuous watch that prints only deltas.
//!
//! # Pipeline
//! - [`sndstat`]: discovers the device over the sndstat ioctl protocol and
//!   builds a [`Snapshot`]
//! - [`nvlist`]: decodes the packed attribute-list blob the kernel returns
//! - [`diff`]: turns two successive snapshots into [`ChangeEvent`]s
//! - [`report`]: renders snapshots and events as text lines
//!
//! # Quick start
//! ```no_run
//! use xruns::{diff, read_snapshot, render_snapshot, ChannelFilter};
//!
//! let snapshot = read_snapshot(None)?;
//! for line in render_snapshot(&snapshot, ChannelFilter::All, false) {
//!     println!("{line}");
//! }
//! # Ok::<(), xruns::XrunsError>(())
//! ```

#![warn(missing_docs)]

pub mod diff;
pub mod nvlist;
pub mod report;
pub mod sndstat;
pub mod snapshot;

/// Error types for device discovery and decoding.
///
/// Every variant aborts only the snapshot read it occurred in: one-shot
/// callers surface it and exit nonzero, watch mode logs it and retries on
/// the next tick.
#[derive(thiserror::Error, Debug)]
pub enum XrunsError {
    /// /dev/sndstat could not be opened
    #[error("cannot open /dev/sndstat: {0}")]
    DeviceUnavailable(#[source] std::io::Error),

    /// The kernel refused to refresh its device list
    #[error("failed to refresh device list: {0}")]
    RefreshFailed(#[source] std::io::Error),

    /// The size-then-fill device list query failed
    #[error("failed to query device list: {0}")]
    QueryFailed(#[source] std::io::Error),

    /// The device list blob did not decode as a packed nvlist, or decoded
    /// entries were missing required attributes
    #[error("corrupt device list: {0}")]
    CorruptData(String),

    /// The device list was empty
    #[error("no soundcards attached")]
    NoDevices,

    /// No sound(4) device with the requested unit number exists
    #[error("device pcm{0} not found")]
    DeviceNotFound(i32),

    /// The selected device carries no channel information
    #[error("no channel info for {0}")]
    NoChannelInfo(String),
}

/// Result type for snapshot reading and decoding.
pub type Result<T> = std::result::Result<T, XrunsError>;

// Public API exports
pub use diff::{diff, ChangeEvent, ChannelFilter};
pub use nvlist::{NvValue, Nvlist};
pub use report::{render_events, render_snapshot, timestamp};
pub use sndstat::{read_snapshot, resolve_unit, snapshot_from_nvlist};
pub use snapshot::{ChanCaps, Channel, Direction, Snapshot, MAX_CHANNELS};
