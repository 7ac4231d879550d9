// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! One frame per `recvmsg`, with the hardware timestamp carried in an
//! `SCM_TIMESTAMPING` control message.
//!
//! This is the fallback for when a receive ring cannot be set up. If the
//! socket buffer overflows the kernel drops frames and nobody finds out.

use std::{
    io::{self, Error as IoError, IoSliceMut},
    os::fd::{AsRawFd, OwnedFd, RawFd},
    pin::Pin,
    task::{Context, Poll},
};

use futures::ready;
use nix::{
    cmsg_space,
    sys::{
        socket::{recvmsg, ControlMessageOwned, LinkAddr, MsgFlags, Timestamps},
        time::TimeSpec,
    },
};
use tokio::io::unix::AsyncFd;

use crate::{
    error::{AddContext, Error},
    iface,
    socket::CaptureSocket,
    ts_to_nanos, CapturedFrame, Nanos,
};

/// Large enough for any frame the socket will hand us without GRO.
const MAX_FRAME: usize = 65536;

pub struct LegacyCapture {
    fd: AsyncFd<OwnedFd>,
    buf: Vec<u8>,
}

impl LegacyCapture {
    pub fn new(socket: CaptureSocket) -> Result<LegacyCapture, Error> {
        iface::request_socket_timestamps(socket.as_raw_fd())?;
        socket.bind()?;

        Ok(LegacyCapture {
            fd: AsyncFd::new(socket.into_fd()).context("register capture socket")?,
            buf: vec![0u8; MAX_FRAME],
        })
    }
}

/// Picks the raw hardware stamp out of the three `SCM_TIMESTAMPING` carries.
/// All-zero means the NIC did not stamp this frame.
fn hardware_time(ts: &Timestamps) -> Option<Nanos> {
    if ts.hw_raw == TimeSpec::new(0, 0) {
        None
    } else {
        Some(ts_to_nanos(ts.hw_raw))
    }
}

fn recvmsg_cap(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, Option<Nanos>)> {
    let mut cmsgs = cmsg_space!([TimeSpec; 3]);
    let mut iov = [IoSliceMut::new(buf)];
    let ret = recvmsg::<LinkAddr>(
        fd,
        &mut iov,
        Some(&mut cmsgs),
        MsgFlags::MSG_DONTWAIT,
    )
    .map_err(|e| IoError::from_raw_os_error(e as i32))?;

    if ret.flags.contains(MsgFlags::MSG_CTRUNC) {
        tracing::warn!("control data truncated");
    }

    let time = ret.cmsgs().find_map(|cmsg| match cmsg {
        ControlMessageOwned::ScmTimestampsns(ts) => hardware_time(&ts),
        _ => None,
    });

    Ok((ret.bytes, time))
}

impl futures::Stream for LegacyCapture {
    type Item = Result<CapturedFrame, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let mut guard = ready!(this.fd.poll_read_ready(cx))?;

            match guard.try_io(|inner| recvmsg_cap(inner.as_raw_fd(), &mut this.buf)) {
                Ok(Ok((len, time))) => {
                    return Poll::Ready(Some(Ok(CapturedFrame {
                        time,
                        hardware: time.is_some(),
                        data: this.buf[..len.min(MAX_FRAME)].to_vec(),
                    })));
                }
                Ok(Err(e)) => return Poll::Ready(Some(Err(e))),
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hardware_time() {
        let stamped = Timestamps {
            system: TimeSpec::new(0, 0),
            hw_trans: TimeSpec::new(0, 0),
            hw_raw: TimeSpec::new(3, 250),
        };
        assert_eq!(hardware_time(&stamped), Some(3_000_000_250));

        let software_only = Timestamps {
            system: TimeSpec::new(1700000000, 1),
            hw_trans: TimeSpec::new(0, 0),
            hw_raw: TimeSpec::new(0, 0),
        };
        assert_eq!(hardware_time(&software_only), None);
    }
}
