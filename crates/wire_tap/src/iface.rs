// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Interface configuration: promiscuous mode and hardware timestamping.
//!
//! The device ioctls take a `struct ifreq` by address. Rather than
//! reinterpreting Rust structs as C ones, the request is an explicit byte
//! buffer with the kernel's layout (see [`IfReq`]), packed and unpacked by
//! hand.

use std::{mem, os::fd::RawFd};

use nix::{
    errno::Errno,
    libc,
    sys::socket::{setsockopt, sockopt, TimestampingFlag},
};

use crate::error::{err, AddContext, Error};

/// Maximum length of an interface name including the trailing NUL.
pub const IFNAMSIZ: usize = libc::IFNAMSIZ;

const IFREQ_SIZE: usize = mem::size_of::<libc::ifreq>();
/// Offset of the `ifr_ifru` union inside `struct ifreq`.
const IFRU_OFFSET: usize = IFNAMSIZ;

/// `include/uapi/linux/sockios.h`
const SIOCSHWTSTAMP: u32 = 0x89b0;

/// `enum hwtstamp_tx_types`
pub const HWTSTAMP_TX_OFF: i32 = 0;
/// `enum hwtstamp_rx_filters`
pub const HWTSTAMP_FILTER_NONE: i32 = 0;
pub const HWTSTAMP_FILTER_ALL: i32 = 1;

type RawIfReq = [u8; IFREQ_SIZE];

mod sys {
    use nix::{ioctl_readwrite_bad, libc};

    use super::{RawIfReq, SIOCSHWTSTAMP};

    ioctl_readwrite_bad!(get_if_index, libc::SIOCGIFINDEX, RawIfReq);
    ioctl_readwrite_bad!(get_if_flags, libc::SIOCGIFFLAGS, RawIfReq);
    ioctl_readwrite_bad!(set_if_flags, libc::SIOCSIFFLAGS, RawIfReq);
    ioctl_readwrite_bad!(set_hw_tstamp, SIOCSHWTSTAMP, RawIfReq);
}

/// `struct ifreq` as bytes.
///
/// | offset | size | field                                     |
/// |--------|------|-------------------------------------------|
/// | 0      | 16   | `ifr_name`, NUL padded                    |
/// | 16     | 2    | `ifr_flags`, native endian `short`        |
/// | 16     | 4    | `ifr_ifindex`, native endian `int`        |
/// | 16     | ptr  | `ifr_data`, native endian pointer         |
///
/// The fields from offset 16 share the same storage (it is a union).
#[derive(Clone)]
pub struct IfReq {
    raw: RawIfReq,
}

impl IfReq {
    pub fn new(name: &str) -> Result<IfReq, Error> {
        let name = name.as_bytes();
        if name.is_empty() || name.len() >= IFNAMSIZ {
            return Err(err("interface name must be 1 to 15 bytes"));
        }
        if name.contains(&0) {
            return Err(err("interface name contains a NUL byte"));
        }

        let mut raw = [0u8; IFREQ_SIZE];
        raw[..name.len()].copy_from_slice(name);
        Ok(IfReq { raw })
    }

    pub fn name(&self) -> &[u8] {
        let end = self.raw[..IFNAMSIZ]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(IFNAMSIZ);
        &self.raw[..end]
    }

    pub fn flags(&self) -> i16 {
        i16::from_ne_bytes([self.raw[IFRU_OFFSET], self.raw[IFRU_OFFSET + 1]])
    }

    pub fn set_flags(&mut self, flags: i16) {
        self.raw[IFRU_OFFSET..IFRU_OFFSET + 2].copy_from_slice(&flags.to_ne_bytes());
    }

    pub fn ifindex(&self) -> i32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.raw[IFRU_OFFSET..IFRU_OFFSET + 4]);
        i32::from_ne_bytes(b)
    }

    /// Points `ifr_data` at `data`. The caller keeps `data` alive for as
    /// long as the request is in flight.
    pub fn set_data(&mut self, data: *mut u8) {
        let ptr = (data as usize).to_ne_bytes();
        self.raw[IFRU_OFFSET..IFRU_OFFSET + ptr.len()].copy_from_slice(&ptr);
    }

    fn as_mut_ptr(&mut self) -> *mut RawIfReq {
        &mut self.raw
    }
}

/// `struct hwtstamp_config` from `include/uapi/linux/net_tstamp.h`.
///
/// | offset | size | field                          |
/// |--------|------|--------------------------------|
/// | 0      | 4    | `flags`, must be zero          |
/// | 4      | 4    | `tx_type` (`HWTSTAMP_TX_*`)    |
/// | 8      | 4    | `rx_filter` (`HWTSTAMP_FILTER_*`) |
///
/// All fields are native endian `int`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwTstampConfig {
    pub flags: i32,
    pub tx_type: i32,
    pub rx_filter: i32,
}

impl HwTstampConfig {
    pub const SIZE: usize = 12;

    /// Transmit stamping off, stamp every received frame.
    pub fn receive_all() -> HwTstampConfig {
        HwTstampConfig {
            flags: 0,
            tx_type: HWTSTAMP_TX_OFF,
            rx_filter: HWTSTAMP_FILTER_ALL,
        }
    }

    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.flags.to_ne_bytes());
        out[4..8].copy_from_slice(&self.tx_type.to_ne_bytes());
        out[8..12].copy_from_slice(&self.rx_filter.to_ne_bytes());
        out
    }

    pub fn unpack(raw: &[u8; Self::SIZE]) -> HwTstampConfig {
        let field = |at: usize| i32::from_ne_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        HwTstampConfig {
            flags: field(0),
            tx_type: field(4),
            rx_filter: field(8),
        }
    }
}

pub fn interface_index(fd: RawFd, name: &str) -> Result<i32, Error> {
    let mut ifr = IfReq::new(name)?;
    unsafe { sys::get_if_index(fd, ifr.as_mut_ptr()) }.context("get interface index")?;
    Ok(ifr.ifindex())
}

fn read_flags(fd: RawFd, ifr: &mut IfReq) -> Result<i16, Error> {
    unsafe { sys::get_if_flags(fd, ifr.as_mut_ptr()) }.config_context("SIOCGIFFLAGS")?;
    Ok(ifr.flags())
}

fn write_flags(fd: RawFd, ifr: &mut IfReq, flags: i16) -> Result<(), Error> {
    ifr.set_flags(flags);
    unsafe { sys::set_if_flags(fd, ifr.as_mut_ptr()) }.config_context("SIOCSIFFLAGS")?;
    Ok(())
}

const IFF_PROMISC: i16 = libc::IFF_PROMISC as i16;

/// Record of having put an interface into promiscuous mode.
///
/// Nothing happens on drop: the flag outlives the process unless
/// [`Promiscuous::revert`] is called.
#[derive(Debug)]
#[must_use]
pub struct Promiscuous {
    name: String,
    flags_at_entry: i16,
}

impl Promiscuous {
    pub fn was_already_promiscuous(&self) -> bool {
        self.flags_at_entry & IFF_PROMISC != 0
    }

    /// Puts the promiscuous bit back the way it was at entry. All other flags
    /// are taken from the interface as it is now.
    pub fn revert(self, fd: RawFd) -> Result<(), Error> {
        let mut ifr = IfReq::new(&self.name)?;
        let now = read_flags(fd, &mut ifr)?;
        let flags = reverted_flags(self.flags_at_entry, now);
        if flags == now {
            tracing::debug!("{}: promiscuous flag already as it was before capture", self.name);
            return Ok(());
        }

        write_flags(fd, &mut ifr, flags)?;
        tracing::info!("removed promiscuous flag from {}", self.name);
        Ok(())
    }
}

/// Interface flags to write back when capture ends: everything as it is
/// `now`, except the promiscuous bit, which goes back to its `entry` state.
pub fn reverted_flags(entry: i16, now: i16) -> i16 {
    (now & !IFF_PROMISC) | (entry & IFF_PROMISC)
}

/// Sets `IFF_PROMISC` on `name`, keeping every other flag as read.
pub fn enable_promiscuous(fd: RawFd, name: &str) -> Result<Promiscuous, Error> {
    let mut ifr = IfReq::new(name)?;
    let flags = read_flags(fd, &mut ifr)?;

    if flags & IFF_PROMISC == 0 {
        write_flags(fd, &mut ifr, flags | IFF_PROMISC)?;
        tracing::info!("{name} is now promiscuous");
    }

    Ok(Promiscuous {
        name: name.to_owned(),
        flags_at_entry: flags,
    })
}

/// Asks the device to stamp every received frame in hardware.
///
/// Returns the configuration the driver actually applied, which may be
/// broader than the request. A driver that answers with no receive filter at
/// all is treated as a refusal.
pub fn enable_hardware_timestamping(fd: RawFd, name: &str) -> Result<HwTstampConfig, Error> {
    let mut config = HwTstampConfig::receive_all().pack();
    let mut ifr = IfReq::new(name)?;
    ifr.set_data(config.as_mut_ptr());

    unsafe { sys::set_hw_tstamp(fd, ifr.as_mut_ptr()) }.config_context("SIOCSHWTSTAMP")?;

    let granted = HwTstampConfig::unpack(&config);
    if granted.rx_filter == HWTSTAMP_FILTER_NONE {
        return Err(Error::Configuration(
            "SIOCSHWTSTAMP granted no receive filter",
            Errno::EOPNOTSUPP,
        ));
    }
    tracing::debug!("{name}: hardware timestamping {granted:?}");
    Ok(granted)
}

/// Requests raw hardware receive timestamps as `SCM_TIMESTAMPING` control
/// messages. Only the legacy receive path reads these.
pub fn request_socket_timestamps(fd: RawFd) -> Result<(), Error> {
    setsockopt(
        fd,
        sockopt::Timestamping,
        &(TimestampingFlag::SOF_TIMESTAMPING_RX_HARDWARE
            | TimestampingFlag::SOF_TIMESTAMPING_RAW_HARDWARE),
    )
    .config_context("setsockopt(SO_TIMESTAMPING)")
}
