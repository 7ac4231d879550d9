// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Hardware-timestamped frame capture on Linux packet sockets.
//!
//! The pieces, leaves first:
//!
//! - [`iface`]: promiscuous mode and device-level hardware timestamping.
//! - [`socket`]: the raw `AF_PACKET` socket bound to one interface.
//! - [`ring`]: the memory-mapped `TPACKET_V2` receive ring.
//! - [`legacy`]: one-frame-at-a-time `recvmsg` with `SCM_TIMESTAMPING`.
//!
//! Both capture paths are exposed as [`futures::Stream`]s of
//! [`CapturedFrame`].

use nix::sys::time::TimeSpec;

mod error;
pub use error::Error;

#[cfg(target_os = "linux")]
pub mod iface;
#[cfg(target_os = "linux")]
pub mod legacy;
pub mod ring;
#[cfg(target_os = "linux")]
pub mod socket;

pub mod pcap_writer;

/// Nanoseconds since the epoch of whichever clock stamped the frame.
pub type Nanos = u64;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

pub fn ts_to_nanos(ts: TimeSpec) -> Nanos {
    (ts.tv_sec() as u64) * NANOS_PER_SEC + (ts.tv_nsec() as u64)
}

/// One frame as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// `None` when the kernel attached no usable timestamp.
    pub time: Option<Nanos>,
    /// Whether `time` came from the NIC's raw hardware clock.
    pub hardware: bool,
    pub data: Vec<u8>,
}
