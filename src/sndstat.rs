//! Snapshot Reader: device discovery against /dev/sndstat
//!
//! Talks to the kernel's sound status interface with the protocol the
//! sndstat(4) ioctls define: refresh the device list, then fetch the packed
//! nvlist describing it with a two-phase size-then-fill query, and finally
//! decode the entry for the requested unit into a [`Snapshot`].
//!
//! The nvlist schema (key names, nesting) is a fixed contract owned by the
//! sound subsystem; the `SNDST_*` constants below mirror sys/sndstat.h.

use std::io;
use std::mem;
use std::ptr;

use crate::nvlist::Nvlist;
use crate::snapshot::{ChanCaps, Channel, Direction, Snapshot, MAX_CHANNELS};
use crate::{Result, XrunsError};

/// Top-level attribute holding the device entry array.
pub const SNDST_DSPS: &str = "dsps";
/// Name of the provider that registered a device entry.
pub const SNDST_DSPS_PROVIDER: &str = "provider";
/// Device display name, e.g. "pcm0:hdaa0".
pub const SNDST_DSPS_NAMEUNIT: &str = "nameunit";
/// Provider-specific nested attribute list.
pub const SNDST_DSPS_PROVIDER_INFO: &str = "provider_info";
/// Provider sentinel for devices owned by the in-kernel sound(4) driver.
pub const SNDST_DSPS_SOUND4_PROVIDER: &str = "sound(4)";
/// Unit number inside the sound(4) provider info.
pub const SNDST_DSPS_SOUND4_UNIT: &str = "unit";
/// Per-channel attribute-list array inside the sound(4) provider info.
pub const SNDST_DSPS_SOUND4_CHAN_INFO: &str = "channel_info";
/// Channel name attribute.
pub const SNDST_DSPS_SOUND4_CHAN_NAME: &str = "name";
/// Channel capability mask attribute.
pub const SNDST_DSPS_SOUND4_CHAN_CAPS: &str = "caps";
/// Cumulative channel xrun counter attribute.
pub const SNDST_DSPS_SOUND4_CHAN_XRUNS: &str = "xruns";

const SNDSTAT_PATH: &[u8] = b"/dev/sndstat\0";

/// Argument block for the SNDSTIOC_GET_DEVS ioctl (sys/sndstat.h).
#[repr(C)]
struct SndstiocNvArg {
    nbytes: usize,
    buf: *mut u8,
}

// FreeBSD ioctl request encoding (sys/ioccom.h)
const IOC_VOID: u64 = 0x2000_0000;
const IOC_OUT: u64 = 0x4000_0000;
const IOC_IN: u64 = 0x8000_0000;
const IOCPARM_MASK: u64 = 0x1fff;

const fn ioc(inout: u64, group: u8, num: u8, len: usize) -> u64 {
    inout | ((len as u64 & IOCPARM_MASK) << 16) | ((group as u64) << 8) | num as u64
}

const SNDSTIOC_GET_DEVS: u64 = ioc(
    IOC_IN | IOC_OUT,
    b'D',
    101,
    mem::size_of::<SndstiocNvArg>(),
);
const SNDSTIOC_REFRESH_DEVS: u64 = ioc(IOC_VOID, b'D', 103, 0);

/// Open handle to the sound status device. Closed on drop, so every exit
/// path out of [`read_snapshot`] releases it.
struct SndstatHandle {
    fd: libc::c_int,
}

impl SndstatHandle {
    fn open() -> io::Result<Self> {
        // SAFETY: the path is a valid NUL-terminated byte string.
        let fd = unsafe { libc::open(SNDSTAT_PATH.as_ptr().cast(), libc::O_RDONLY) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Ask the kernel to rebuild its device list before we fetch it.
    fn refresh(&self) -> io::Result<()> {
        // SAFETY: fd is open and SNDSTIOC_REFRESH_DEVS takes no argument.
        let rc = unsafe { libc::ioctl(self.fd, SNDSTIOC_REFRESH_DEVS as _) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Fetch the packed device-list blob.
    ///
    /// Two-phase protocol: a zero-length probe fills in the required size,
    /// then the same ioctl is reissued with a buffer of exactly that size.
    fn fetch_devs(&self) -> io::Result<Vec<u8>> {
        let mut arg = SndstiocNvArg {
            nbytes: 0,
            buf: ptr::null_mut(),
        };
        // SAFETY: arg is a valid SndstiocNvArg; a null buf requests the size.
        let rc =
            unsafe { libc::ioctl(self.fd, SNDSTIOC_GET_DEVS as _, &mut arg as *mut SndstiocNvArg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut buf = vec![0u8; arg.nbytes];
        arg.buf = buf.as_mut_ptr();
        // SAFETY: buf stays alive across the call and holds arg.nbytes bytes.
        let rc =
            unsafe { libc::ioctl(self.fd, SNDSTIOC_GET_DEVS as _, &mut arg as *mut SndstiocNvArg) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        // The kernel reports how much it actually wrote.
        buf.truncate(arg.nbytes);
        Ok(buf)
    }
}

impl Drop for SndstatHandle {
    fn drop(&mut self) {
        // SAFETY: fd was opened by us and is closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}

/// The unit the tool will query: the requested one, or the system default.
pub fn resolve_unit(requested: Option<i32>) -> i32 {
    requested.unwrap_or_else(default_unit)
}

/// Default audio unit from the hw.snd.default_unit sysctl, the same value
/// mixer_get_dunit(3) reports.
#[cfg(target_os = "freebsd")]
fn default_unit() -> i32 {
    let mut unit: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>();
    // SAFETY: unit/len describe a valid c_int-sized output buffer.
    let rc = unsafe {
        libc::sysctlbyname(
            b"hw.snd.default_unit\0".as_ptr().cast(),
            (&mut unit as *mut libc::c_int).cast(),
            &mut len,
            ptr::null(),
            0,
        )
    };
    if rc < 0 {
        0
    } else {
        unit
    }
}

#[cfg(not(target_os = "freebsd"))]
fn default_unit() -> i32 {
    0
}

/// Read a fresh [`Snapshot`] for the requested unit (or the system default
/// when `None`).
///
/// Self-contained: opens and closes one sndstat handle per call and retains
/// no state across calls. There is no partial success; the result is either
/// a fully populated snapshot or an error.
pub fn read_snapshot(requested_unit: Option<i32>) -> Result<Snapshot> {
    let handle = SndstatHandle::open().map_err(XrunsError::DeviceUnavailable)?;
    handle.refresh().map_err(XrunsError::RefreshFailed)?;
    let blob = handle.fetch_devs().map_err(XrunsError::QueryFailed)?;
    drop(handle);

    let nvl = Nvlist::unpack(&blob)?;
    snapshot_from_nvlist(&nvl, resolve_unit(requested_unit))
}

/// Decode the device-list nvlist into a [`Snapshot`] for `unit`.
///
/// Pure decode step of [`read_snapshot`], split out so it can be exercised
/// against synthetic blobs.
pub fn snapshot_from_nvlist(nvl: &Nvlist, unit: i32) -> Result<Snapshot> {
    if nvl.is_empty() || !nvl.exists(SNDST_DSPS) {
        return Err(XrunsError::NoDevices);
    }
    let dsps = nvl.nvlist_array(SNDST_DSPS).ok_or(XrunsError::NoDevices)?;

    let mut selected = None;
    for entry in dsps {
        if entry.string(SNDST_DSPS_PROVIDER) != Some(SNDST_DSPS_SOUND4_PROVIDER) {
            continue;
        }
        let Some(info) = entry.nvlist(SNDST_DSPS_PROVIDER_INFO) else {
            continue;
        };
        if info.number(SNDST_DSPS_SOUND4_UNIT) == Some(unit as u64) {
            selected = Some((entry, info));
            break;
        }
    }
    let (entry, info) = selected.ok_or(XrunsError::DeviceNotFound(unit))?;

    let devname = entry
        .string(SNDST_DSPS_NAMEUNIT)
        .ok_or_else(|| XrunsError::CorruptData("device entry missing nameunit".into()))?
        .to_string();

    let chan_info = info
        .nvlist_array(SNDST_DSPS_SOUND4_CHAN_INFO)
        .ok_or_else(|| XrunsError::NoChannelInfo(devname.clone()))?;

    let mut channels = Vec::with_capacity(chan_info.len().min(MAX_CHANNELS));
    for chan in chan_info.iter().take(MAX_CHANNELS) {
        let name = chan
            .string(SNDST_DSPS_SOUND4_CHAN_NAME)
            .ok_or_else(|| XrunsError::CorruptData("channel entry missing name".into()))?;
        let caps = chan
            .number(SNDST_DSPS_SOUND4_CHAN_CAPS)
            .ok_or_else(|| XrunsError::CorruptData(format!("channel {name} missing caps")))?;
        let xruns = chan
            .number(SNDST_DSPS_SOUND4_CHAN_XRUNS)
            .ok_or_else(|| XrunsError::CorruptData(format!("channel {name} missing xruns")))?;

        channels.push(Channel {
            name: name.to_string(),
            direction: Direction::from_caps(ChanCaps::from_bits_truncate(caps)),
            xruns,
        });
    }

    Ok(Snapshot {
        unit,
        devname,
        channels,
    })
}
