// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! The tapdelay CLI.
use clap::Parser;
use delay_join::MalformedPolicy;
use libtapdelay::{
    config::{CaptureConfig, CaptureMode, CorrelateConfig, DEFAULT_DISPLAY_CAP, DEFAULT_LOG_TEMPLATE},
    Error,
};
use tracing::metadata::LevelFilter;
use wire_tap::ring::RingGeometry;

use std::{fmt::Debug, path::PathBuf};

use tracing_subscriber::prelude::*;

#[derive(clap::Parser, Debug)]
enum Command {
    /// Prints a line per frame received on an interface, stamped by the NIC.
    /// Needs CAP_NET_RAW and CAP_NET_ADMIN.
    Capture {
        /// Interface to capture on; it is made promiscuous.
        #[clap(short = 'i', long, default_value = "eth0")]
        interface: String,
        /// Remove the promiscuous flag again on exit.
        #[clap(short = 'r', long)]
        remove: bool,
        /// Receive one frame per recvmsg instead of through the rx ring.
        #[clap(long)]
        legacy: bool,
        /// Use recvmsg if the rx ring cannot be set up.
        #[clap(long, conflicts_with = "legacy")]
        fallback_legacy: bool,
        /// Bytes per ring slot (power of two).
        #[clap(long, default_value_t = RingGeometry::default().frame_size)]
        frame_size: usize,
        /// Slots in the ring (power of two).
        #[clap(long, default_value_t = RingGeometry::default().frame_count)]
        frame_count: usize,
        /// Label put in front of every line, e.g. tap1.
        #[clap(long)]
        prefix: Option<String>,
        /// Print at most this many payload bytes per frame.
        #[clap(long)]
        max_bytes: Option<usize>,
        /// Also write every frame to this pcapng file.
        #[clap(long)]
        pcap: Option<PathBuf>,
    },
    /// Reads merged tap1/tap2 lines and prints the delay of every frame seen
    /// at both.
    Correlate {
        /// Label for the log's type column and its file name.
        #[clap(short = 't', long = "type", default_value = "hardware")]
        type_label: String,
        /// Sample log path; TYPE and TIME are filled in.
        #[clap(short = 'f', long = "file", default_value = DEFAULT_LOG_TEMPLATE)]
        log_template: String,
        /// Do not write a sample log.
        #[clap(long, conflicts_with = "log_template")]
        no_log: bool,
        /// Nanoseconds added to every delay.
        #[clap(short = 'o', long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,
        /// Characters of packet text shown per sample; 0 for all.
        #[clap(long, default_value_t = DEFAULT_DISPLAY_CAP)]
        display_width: usize,
        /// Warn about unparseable lines instead of stopping.
        #[clap(long)]
        skip_malformed: bool,
        /// Read from this file instead of stdin.
        #[clap(long)]
        input: Option<PathBuf>,
    },
}

impl Command {
    fn capture_config(self) -> Option<CaptureConfig> {
        match self {
            Command::Capture {
                interface,
                remove,
                legacy,
                fallback_legacy,
                frame_size,
                frame_count,
                prefix,
                max_bytes,
                pcap,
            } => Some(CaptureConfig {
                interface,
                remove_promiscuous: remove,
                mode: if legacy {
                    CaptureMode::Legacy
                } else {
                    CaptureMode::Ring
                },
                fallback_to_legacy: fallback_legacy,
                geometry: RingGeometry {
                    frame_size,
                    frame_count,
                },
                prefix,
                payload_cap: max_bytes,
                pcap_output: pcap,
            }),
            _ => None,
        }
    }

    fn correlate_config(self) -> Option<CorrelateConfig> {
        match self {
            Command::Correlate {
                type_label,
                log_template,
                no_log,
                offset,
                display_width,
                skip_malformed,
                input,
            } => Some(CorrelateConfig {
                type_label,
                log_template: (!no_log).then_some(log_template),
                offset_ns: offset,
                display_cap: (display_width != 0).then_some(display_width),
                malformed: if skip_malformed {
                    MalformedPolicy::Skip
                } else {
                    MalformedPolicy::Fatal
                },
                input,
            }),
            _ => None,
        }
    }
}

#[cfg(target_os = "linux")]
fn do_capture(config: CaptureConfig) -> Result<(), Error> {
    libtapdelay::capture::do_capture(&config)
}

#[cfg(not(target_os = "linux"))]
fn do_capture(_config: CaptureConfig) -> Result<(), Error> {
    Err("capture is only supported on Linux".into())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::Layer::new()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Command::parse();

    match args {
        cmd @ Command::Capture { .. } => {
            if let Some(config) = cmd.capture_config() {
                do_capture(config)?
            }
        }
        cmd @ Command::Correlate { .. } => {
            if let Some(config) = cmd.correlate_config() {
                libtapdelay::correlate::do_correlate(&config)?
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_capture_args() {
        let cmd = Command::try_parse_from([
            "tapdelay", "capture", "-i", "enp5s0", "-r", "--prefix", "tap1", "--frame-count", "1024",
        ])
        .unwrap();
        let config = cmd.capture_config().unwrap();
        assert_eq!(
            config,
            CaptureConfig {
                interface: "enp5s0".into(),
                remove_promiscuous: true,
                prefix: Some("tap1".into()),
                geometry: RingGeometry {
                    frame_size: 2048,
                    frame_count: 1024,
                },
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_correlate_args() {
        let cmd = Command::try_parse_from(["tapdelay", "correlate", "-o", "-200", "--no-log"]).unwrap();
        let config = cmd.correlate_config().unwrap();
        assert_eq!(
            config,
            CorrelateConfig {
                offset_ns: -200,
                log_template: None,
                ..Default::default()
            }
        );

        let cmd = Command::try_parse_from(["tapdelay", "correlate"]).unwrap();
        assert_eq!(cmd.correlate_config().unwrap(), CorrelateConfig::default());
    }

    #[test]
    fn test_conflicts() {
        assert!(Command::try_parse_from(["tapdelay", "capture", "--legacy", "--fallback-legacy"]).is_err());
        assert!(Command::try_parse_from(["tapdelay", "correlate", "-f", "x.csv", "--no-log"]).is_err());
    }
}
