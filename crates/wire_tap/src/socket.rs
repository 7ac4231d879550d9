// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! The raw packet socket both capture paths read from.

use std::{
    mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};

use nix::{
    libc,
    sys::socket::{bind, socket, AddressFamily, LinkAddr, SockFlag, SockProtocol, SockType, SockaddrLike},
};

use crate::{
    error::{err, AddContext, Error},
    iface,
};

/// A non-blocking `AF_PACKET` socket, not yet bound.
pub struct CaptureSocket {
    fd: OwnedFd,
    if_name: String,
    if_index: i32,
}

impl CaptureSocket {
    /// Opens the socket and resolves `dev_name`. No frames are delivered
    /// until [`CaptureSocket::bind`].
    pub fn open(dev_name: &str) -> Result<CaptureSocket, Error> {
        let raw = socket(
            AddressFamily::Packet,
            SockType::Raw,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            SockProtocol::Raw,
        )
        .context("capture socket()")?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let if_index = iface::interface_index(fd.as_raw_fd(), dev_name)?;

        Ok(CaptureSocket {
            fd,
            if_name: dev_name.to_owned(),
            if_index,
        })
    }

    pub fn if_name(&self) -> &str {
        &self.if_name
    }

    pub fn if_index(&self) -> i32 {
        self.if_index
    }

    /// Starts delivery of every protocol seen on the interface.
    pub fn bind(&self) -> Result<(), Error> {
        let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        sll.sll_ifindex = self.if_index;

        let sll = unsafe {
            LinkAddr::from_raw(
                &sll as *const _ as *const libc::sockaddr,
                Some(mem::size_of::<libc::sockaddr_ll>() as u32),
            )
        }
        .ok_or(err("sockaddr_ll rejected"))?;

        bind(self.fd.as_raw_fd(), &sll).context("bind capture socket")?;
        tracing::debug!("bound capture socket to {} (index {})", self.if_name, self.if_index);
        Ok(())
    }

    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsRawFd for CaptureSocket {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }
}
