// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Capture on one interface: set it up for hardware timestamps, print a
//! record per frame until interrupted, then put the interface back.

use std::{
    fs,
    io::{self, BufWriter, Write},
    os::fd::AsRawFd,
};

use chrono::{Local, TimeZone};
use futures::{stream::LocalBoxStream, StreamExt};
use wire_tap::{
    iface, legacy::LegacyCapture, pcap_writer::PcapWriter, ring::RingCapture,
    socket::CaptureSocket, CapturedFrame,
};

use crate::{
    config::{CaptureConfig, CaptureMode},
    display::capture_record,
    Error, Shutdown,
};

type Frames = LocalBoxStream<'static, io::Result<CapturedFrame>>;

fn open_frames(config: &CaptureConfig) -> Result<Frames, Error> {
    let socket = CaptureSocket::open(&config.interface)?;

    if config.mode == CaptureMode::Legacy {
        tracing::info!("capturing on {} with recvmsg", config.interface);
        return Ok(LegacyCapture::new(socket)?.boxed_local());
    }

    match RingCapture::new(socket, &config.geometry) {
        Ok(ring) => {
            tracing::info!("capturing on {} through the rx ring", config.interface);
            Ok(ring.boxed_local())
        }
        Err(e) if e.is_ring_setup() && config.fallback_to_legacy => {
            tracing::warn!("{e}; falling back to recvmsg");
            let socket = CaptureSocket::open(&config.interface)?;
            Ok(LegacyCapture::new(socket)?.boxed_local())
        }
        Err(e) => Err(e.into()),
    }
}

/// Turns frames into output records.
struct Recorder<W: Write, Tz: TimeZone> {
    out: W,
    tz: Tz,
    prefix: Option<String>,
    payload_cap: Option<usize>,
    pcap: Option<PcapWriter<BufWriter<fs::File>>>,
    warned_software: bool,
    printed: u64,
    skipped: u64,
}

impl<W: Write, Tz: TimeZone> Recorder<W, Tz>
where
    Tz::Offset: std::fmt::Display,
{
    fn new(out: W, tz: Tz, config: &CaptureConfig) -> Result<Self, Error> {
        let pcap = match &config.pcap_output {
            Some(path) => {
                let file = fs::OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .create(true)
                    .open(path)?;
                tracing::info!("writing frames to {}", path.display());
                Some(PcapWriter::new(BufWriter::new(file), &config.interface)?)
            }
            None => None,
        };

        Ok(Recorder {
            out,
            tz,
            prefix: config.prefix.clone(),
            payload_cap: config.payload_cap,
            pcap,
            warned_software: false,
            printed: 0,
            skipped: 0,
        })
    }

    fn on_frame(&mut self, frame: &CapturedFrame) -> io::Result<()> {
        let Some(time) = frame.time else {
            tracing::debug!("frame without a timestamp, skipping");
            self.skipped += 1;
            return Ok(());
        };
        if !frame.hardware && !self.warned_software {
            tracing::warn!("got a frame without a hardware timestamp; times may be software clock");
            self.warned_software = true;
        }

        let Some(line) = capture_record(
            &self.tz,
            self.prefix.as_deref(),
            time,
            &frame.data,
            self.payload_cap,
        ) else {
            tracing::debug!("runt frame of {} bytes", frame.data.len());
            self.skipped += 1;
            return Ok(());
        };

        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        self.printed += 1;

        if let Some(pcap) = &mut self.pcap {
            pcap.on_packet(time, &frame.data)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(pcap) = &mut self.pcap {
            pcap.flush()?;
        }
        self.out.flush()
    }
}

async fn capture_until_signal<W: Write, Tz: TimeZone>(
    mut frames: Frames,
    recorder: &mut Recorder<W, Tz>,
    shutdown: &mut Shutdown,
) -> Result<(), Error>
where
    Tz::Offset: std::fmt::Display,
{
    let mut last: Option<CapturedFrame> = None;
    let result: Result<(), Error> = loop {
        tokio::select! {
            r = shutdown.wait() => {
                tracing::info!("shutdown requested");
                break r.map_err(Into::into);
            }
            frame = frames.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                };
                if let Err(e) = recorder.on_frame(&frame) {
                    last = Some(frame);
                    break Err(e.into());
                }
                last = Some(frame);
            }
        }
    };

    if result.is_err() {
        if let Some(frame) = &last {
            tracing::error!("last frame: {}", hex::encode(&frame.data));
        }
    }
    let flushed = recorder.finish();
    result?;
    flushed?;
    Ok(())
}

/// Runs capture until SIGINT or SIGTERM.
///
/// The interface is left promiscuous unless `remove_promiscuous` is set, in
/// which case the flag is reverted however capture ended.
pub fn do_capture(config: &CaptureConfig) -> Result<(), Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    // caught before the interface is touched, so an interrupt during setup
    // still ends in the cleanup below
    let mut shutdown = {
        let _guard = rt.enter();
        Shutdown::register()?
    };

    // ioctls go through their own socket so the capture socket can be handed
    // off to either receive path
    let control = CaptureSocket::open(&config.interface)?;
    let promiscuous = iface::enable_promiscuous(control.as_raw_fd(), &config.interface)?;

    let result = run(config, &control, &rt, &mut shutdown);

    if config.remove_promiscuous {
        if let Err(e) = promiscuous.revert(control.as_raw_fd()) {
            tracing::warn!("could not restore {}: {e}", config.interface);
        }
    } else if !promiscuous.was_already_promiscuous() {
        tracing::info!("leaving {} promiscuous", config.interface);
    }

    if let Err(e) = &result {
        tracing::error!("capture failed: {e}");
    }
    result
}

fn run(
    config: &CaptureConfig,
    control: &CaptureSocket,
    rt: &tokio::runtime::Runtime,
    shutdown: &mut Shutdown,
) -> Result<(), Error> {
    iface::enable_hardware_timestamping(control.as_raw_fd(), &config.interface)?;

    rt.block_on(async {
        let frames = open_frames(config)?;
        let stdout = io::stdout().lock();
        let mut recorder = Recorder::new(stdout, Local, config)?;
        let result = capture_until_signal(frames, &mut recorder, shutdown).await;
        tracing::info!(
            printed = recorder.printed,
            skipped = recorder.skipped,
            "capture finished"
        );
        result
    })
}
