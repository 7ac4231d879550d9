// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Settings for the two commands, built once from the command line.

use std::path::PathBuf;

use delay_join::MalformedPolicy;
use wire_tap::ring::RingGeometry;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureMode {
    /// Memory-mapped `TPACKET_V2` receive ring.
    #[default]
    Ring,
    /// One `recvmsg` per frame.
    Legacy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub interface: String,
    /// Take the promiscuous flag off again when capture ends.
    pub remove_promiscuous: bool,
    pub mode: CaptureMode,
    /// Retry on the legacy path if the ring cannot be set up.
    pub fallback_to_legacy: bool,
    pub geometry: RingGeometry,
    /// Label printed before every record.
    pub prefix: Option<String>,
    /// Most payload bytes (after the Ethernet header) printed per record.
    pub payload_cap: Option<usize>,
    pub pcap_output: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: "eth0".into(),
            remove_promiscuous: false,
            mode: CaptureMode::Ring,
            fallback_to_legacy: false,
            geometry: RingGeometry::default(),
            prefix: None,
            payload_cap: None,
            pcap_output: None,
        }
    }
}

pub const DEFAULT_LOG_TEMPLATE: &str = "/tmp/ts_TYPE_TIME.csv";
pub const DEFAULT_DISPLAY_CAP: usize = 72;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelateConfig {
    /// Goes in the `type` column of the log and replaces `TYPE` in its path.
    pub type_label: String,
    /// `None` turns the CSV log off.
    pub log_template: Option<String>,
    /// Added to every delay, for calibration.
    pub offset_ns: i64,
    pub display_cap: Option<usize>,
    pub malformed: MalformedPolicy,
    /// Read from stdin if unset.
    pub input: Option<PathBuf>,
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        CorrelateConfig {
            type_label: "hardware".into(),
            log_template: Some(DEFAULT_LOG_TEMPLATE.into()),
            offset_ns: 0,
            display_cap: Some(DEFAULT_DISPLAY_CAP),
            malformed: MalformedPolicy::Fatal,
            input: None,
        }
    }
}
