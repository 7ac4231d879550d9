// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Zero-copy receive through a `PACKET_RX_RING` (`TPACKET_V2`).
//!
//! The ring is `frame_count` slots of `frame_size` bytes each, shared with
//! the kernel. Every slot starts with a `tpacket2_hdr` whose first word is
//! the status handshake: the kernel sets `TP_STATUS_USER` once the slot is
//! filled and leaves it alone until we store `TP_STATUS_KERNEL` back. The
//! status word is only ever touched atomically; the rest of the slot is
//! copied out before the slot is handed back.
//!
//! <https://www.kernel.org/doc/Documentation/networking/packet_mmap.txt>

use std::{
    ptr,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{error::Error, CapturedFrame, Nanos, NANOS_PER_SEC};

pub const TP_STATUS_KERNEL: u32 = 0;
pub const TP_STATUS_USER: u32 = 1 << 0;
pub const TP_STATUS_TS_SOFTWARE: u32 = 1 << 29;
pub const TP_STATUS_TS_RAW_HARDWARE: u32 = 1 << 31;

/// Smallest slot we accept: header, `sockaddr_ll` and a minimal frame.
const MIN_FRAME_SIZE: usize = 128;

/// Shape of the ring. Both numbers must be powers of two so that the cursor
/// wraps with a mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingGeometry {
    pub frame_size: usize,
    pub frame_count: usize,
}

impl Default for RingGeometry {
    fn default() -> Self {
        RingGeometry {
            frame_size: 2048,
            frame_count: 4096,
        }
    }
}

impl RingGeometry {
    pub fn validate(&self) -> Result<(), Error> {
        let bad = |why: &str| Err(Error::RingGeometry(format!("{self:?}: {why}")));

        if !self.frame_size.is_power_of_two() || !self.frame_count.is_power_of_two() {
            return bad("frame size and count must be powers of two");
        }
        if self.frame_size < MIN_FRAME_SIZE {
            return bad("frame size is smaller than a slot header");
        }
        match self.frame_size.checked_mul(self.frame_count) {
            Some(len) if len <= u32::MAX as usize => Ok(()),
            _ => bad("ring does not fit in 32 bits"),
        }
    }

    /// Size of the mapping, `frame_size * frame_count`.
    pub fn mapped_len(&self) -> usize {
        self.frame_size * self.frame_count
    }

    /// The `tpacket_req` for this geometry. Blocks are a page or one frame,
    /// whichever is larger, so no frame straddles a block boundary and the
    /// slots are contiguous.
    pub fn request(&self, page_size: usize) -> Result<TpacketReq, Error> {
        self.validate()?;

        let block_size = self.frame_size.max(page_size);
        if self.mapped_len() < block_size {
            return Err(Error::RingGeometry(format!(
                "{self:?}: ring is smaller than one {block_size} byte block"
            )));
        }

        Ok(TpacketReq {
            block_size: block_size as u32,
            block_nr: (self.mapped_len() / block_size) as u32,
            frame_size: self.frame_size as u32,
            frame_nr: self.frame_count as u32,
        })
    }
}

/// `struct tpacket_req`: four native endian `unsigned int`s, in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TpacketReq {
    pub block_size: u32,
    pub block_nr: u32,
    pub frame_size: u32,
    pub frame_nr: u32,
}

impl TpacketReq {
    pub fn pack(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        for (i, v) in [self.block_size, self.block_nr, self.frame_size, self.frame_nr]
            .into_iter()
            .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
        }
        out
    }
}

/// `struct tpacket2_hdr`, native endian:
///
/// | offset | size | field          |
/// |--------|------|----------------|
/// | 0      | 4    | `tp_status`    |
/// | 4      | 4    | `tp_len`       |
/// | 8      | 4    | `tp_snaplen`   |
/// | 12     | 2    | `tp_mac`       |
/// | 14     | 2    | `tp_net`       |
/// | 16     | 4    | `tp_sec`       |
/// | 20     | 4    | `tp_nsec`      |
/// | 24     | 2    | `tp_vlan_tci`  |
/// | 26     | 2    | `tp_vlan_tpid` |
/// | 28     | 4    | padding        |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tpacket2Hdr {
    pub status: u32,
    pub len: u32,
    pub snaplen: u32,
    pub mac: u16,
    pub net: u16,
    pub sec: u32,
    pub nsec: u32,
    pub vlan_tci: u16,
    pub vlan_tpid: u16,
}

impl Tpacket2Hdr {
    pub const SIZE: usize = 32;

    pub fn unpack(raw: &[u8; Self::SIZE]) -> Tpacket2Hdr {
        let u32_at = |at: usize| u32::from_ne_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let u16_at = |at: usize| u16::from_ne_bytes([raw[at], raw[at + 1]]);
        Tpacket2Hdr {
            status: u32_at(0),
            len: u32_at(4),
            snaplen: u32_at(8),
            mac: u16_at(12),
            net: u16_at(14),
            sec: u32_at(16),
            nsec: u32_at(20),
            vlan_tci: u16_at(24),
            vlan_tpid: u16_at(26),
        }
    }

    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.status.to_ne_bytes());
        out[4..8].copy_from_slice(&self.len.to_ne_bytes());
        out[8..12].copy_from_slice(&self.snaplen.to_ne_bytes());
        out[12..14].copy_from_slice(&self.mac.to_ne_bytes());
        out[14..16].copy_from_slice(&self.net.to_ne_bytes());
        out[16..20].copy_from_slice(&self.sec.to_ne_bytes());
        out[20..24].copy_from_slice(&self.nsec.to_ne_bytes());
        out[24..26].copy_from_slice(&self.vlan_tci.to_ne_bytes());
        out[26..28].copy_from_slice(&self.vlan_tpid.to_ne_bytes());
        out
    }

    pub fn time(&self) -> Nanos {
        self.sec as u64 * NANOS_PER_SEC + self.nsec as u64
    }
}

/// Memory holding a ring.
///
/// # Safety
///
/// `as_ptr` must return a pointer to `len` bytes that stay valid for reads
/// and writes for as long as the value lives, aligned to at least 8 bytes.
/// Another party (the kernel) may write to it concurrently, but only to
/// slots whose status word says they belong to it.
pub unsafe trait RingMemory {
    fn as_ptr(&self) -> *mut u8;
    fn len(&self) -> usize;
}

/// Reader side of a receive ring.
pub struct RxRing<M: RingMemory> {
    mem: M,
    frame_size: usize,
    mask: usize,
    cursor: usize,
}

impl<M: RingMemory> RxRing<M> {
    /// Starts reading at slot 0, which is where the kernel starts filling
    /// a freshly registered ring.
    pub fn new(mem: M, geometry: &RingGeometry) -> Result<RxRing<M>, Error> {
        geometry.validate()?;
        if mem.len() < geometry.mapped_len() {
            return Err(Error::RingGeometry(format!(
                "{geometry:?}: mapping is only {} bytes",
                mem.len()
            )));
        }

        Ok(RxRing {
            mem,
            frame_size: geometry.frame_size,
            mask: geometry.frame_count - 1,
            cursor: 0,
        })
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    fn slot(&self, index: usize) -> *mut u8 {
        debug_assert!(index <= self.mask);
        // in bounds: index * frame_size < mapped_len <= mem.len()
        unsafe { self.mem.as_ptr().add(index * self.frame_size) }
    }

    fn status(&self, index: usize) -> &AtomicU32 {
        // slots are frame_size (a power of two >= 128) apart from an 8 byte
        // aligned base, so the status word is aligned
        unsafe { &*(self.slot(index) as *const AtomicU32) }
    }

    /// Takes the frame at the cursor if the kernel has finished with it.
    ///
    /// The payload is copied out before the slot is returned to the kernel.
    /// Slots with an impossible header are returned without yielding
    /// anything.
    pub fn next_frame(&mut self) -> Option<CapturedFrame> {
        loop {
            let index = self.cursor;
            let status = self.status(index).load(Ordering::Acquire);
            if status & TP_STATUS_USER == 0 {
                return None;
            }

            let slot = self.slot(index);
            let mut raw = [0u8; Tpacket2Hdr::SIZE];
            unsafe { ptr::copy_nonoverlapping(slot, raw.as_mut_ptr(), Tpacket2Hdr::SIZE) };
            let hdr = Tpacket2Hdr::unpack(&raw);

            let start = hdr.mac as usize;
            let end = start + hdr.snaplen as usize;
            let data = if start >= Tpacket2Hdr::SIZE && end <= self.frame_size {
                let mut data = vec![0u8; end - start];
                unsafe { ptr::copy_nonoverlapping(slot.add(start), data.as_mut_ptr(), data.len()) };
                Some(data)
            } else {
                tracing::warn!("ring slot {index} has a bad header, dropping: {hdr:?}");
                None
            };

            self.status(index).store(TP_STATUS_KERNEL, Ordering::Release);
            self.cursor = (index + 1) & self.mask;

            if let Some(data) = data {
                if hdr.len > hdr.snaplen {
                    tracing::trace!("frame truncated by ring: {} of {} bytes", hdr.snaplen, hdr.len);
                }
                return Some(CapturedFrame {
                    time: Some(hdr.time()),
                    hardware: status & TP_STATUS_TS_RAW_HARDWARE != 0,
                    data,
                });
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use self::linux::{configure_ring, MmapRegion, RingCapture};

#[cfg(target_os = "linux")]
mod linux {
    use std::{
        io,
        num::NonZeroUsize,
        os::fd::{AsRawFd, OwnedFd, RawFd},
        pin::Pin,
        ptr::NonNull,
        task::{Context, Poll},
    };

    use futures::ready;
    use nix::{
        errno::Errno,
        libc,
        sys::mman::{mmap, munmap, MapFlags, ProtFlags},
        unistd::{sysconf, SysconfVar},
    };
    use tokio::io::unix::AsyncFd;

    use super::{RingGeometry, RingMemory, RxRing};
    use crate::{
        error::{AddContext, Error},
        socket::CaptureSocket,
        CapturedFrame,
    };

    // include/uapi/linux/if_packet.h
    const SOL_PACKET: libc::c_int = 263;
    const PACKET_RX_RING: libc::c_int = 5;
    const PACKET_VERSION: libc::c_int = 10;
    const PACKET_TIMESTAMP: libc::c_int = 17;
    const PACKET_IGNORE_OUTGOING: libc::c_int = 23;
    const TPACKET_V2: libc::c_int = 1;
    // include/uapi/linux/net_tstamp.h
    const SOF_TIMESTAMPING_RAW_HARDWARE: libc::c_int = 1 << 6;

    fn set_packet_opt(fd: RawFd, opt: libc::c_int, value: &[u8]) -> nix::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                fd,
                SOL_PACKET,
                opt,
                value.as_ptr().cast(),
                value.len() as libc::socklen_t,
            )
        };
        Errno::result(ret).map(drop)
    }

    fn page_size() -> Result<usize, Error> {
        let size = sysconf(SysconfVar::PAGE_SIZE).ring_context("sysconf(PAGE_SIZE)")?;
        Ok(size.map(|s| s as usize).unwrap_or(4096))
    }

    /// A shared, read-write mapping of a packet socket's ring.
    pub struct MmapRegion {
        ptr: NonNull<u8>,
        len: usize,
    }

    impl MmapRegion {
        pub fn map(fd: RawFd, len: usize) -> Result<MmapRegion, Error> {
            let length = NonZeroUsize::new(len).ok_or(Error::RingGeometry("empty ring".into()))?;
            let ptr = unsafe {
                mmap(
                    None,
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    fd,
                    0,
                )
            }
            .ring_context("mmap ring")?;

            let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(Error::RingSetup("mmap ring", Errno::EFAULT))?;
            Ok(MmapRegion { ptr, len })
        }
    }

    unsafe impl RingMemory for MmapRegion {
        fn as_ptr(&self) -> *mut u8 {
            self.ptr.as_ptr()
        }

        fn len(&self) -> usize {
            self.len
        }
    }

    impl Drop for MmapRegion {
        fn drop(&mut self) {
            if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.len) } {
                tracing::warn!("munmap ring: {e}");
            }
        }
    }

    /// Sets up `PACKET_RX_RING` on an unbound packet socket and maps it.
    ///
    /// The version has to be chosen before the ring is requested.
    pub fn configure_ring(fd: RawFd, geometry: &RingGeometry) -> Result<MmapRegion, Error> {
        let req = geometry.request(page_size()?)?;

        set_packet_opt(fd, PACKET_VERSION, &TPACKET_V2.to_ne_bytes()).ring_context("PACKET_VERSION")?;
        set_packet_opt(fd, PACKET_TIMESTAMP, &SOF_TIMESTAMPING_RAW_HARDWARE.to_ne_bytes())
            .ring_context("PACKET_TIMESTAMP")?;
        set_packet_opt(fd, PACKET_IGNORE_OUTGOING, &1i32.to_ne_bytes())
            .ring_context("PACKET_IGNORE_OUTGOING")?;
        set_packet_opt(fd, PACKET_RX_RING, &req.pack()).ring_context("PACKET_RX_RING")?;
        tracing::debug!("rx ring {req:?}");

        MmapRegion::map(fd, geometry.mapped_len())
    }

    /// Frames from a receive ring, waiting on socket readiness whenever the
    /// slot under the cursor is still the kernel's.
    pub struct RingCapture {
        // unmapped before the socket is closed
        ring: RxRing<MmapRegion>,
        fd: AsyncFd<OwnedFd>,
    }

    impl RingCapture {
        pub fn new(socket: CaptureSocket, geometry: &RingGeometry) -> Result<RingCapture, Error> {
            let region = configure_ring(socket.as_raw_fd(), geometry)?;
            let ring = RxRing::new(region, geometry)?;
            socket.bind()?;

            Ok(RingCapture {
                ring,
                fd: AsyncFd::new(socket.into_fd()).context("register capture socket")?,
            })
        }
    }

    impl futures::Stream for RingCapture {
        type Item = Result<CapturedFrame, io::Error>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let this = self.get_mut();
            loop {
                if let Some(frame) = this.ring.next_frame() {
                    return Poll::Ready(Some(Ok(frame)));
                }

                let mut guard = ready!(this.fd.poll_read_ready(cx))?;
                // a frame may have landed between the scan and the wakeup
                if let Some(frame) = this.ring.next_frame() {
                    return Poll::Ready(Some(Ok(frame)));
                }
                guard.clear_ready();
            }
        }
    }
}
