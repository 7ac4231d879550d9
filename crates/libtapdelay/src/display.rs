// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! The one-line text record printed for every captured frame:
//!
//! ```text
//! [prefix ]HH:MM:SS.nnnnnnnnn \t src -> dst, type=0xTTTT, hash=b'...'
//! ```
//!
//! Everything after the time is what the correlator joins on, so it has to
//! come out byte-for-byte the same at both taps.

use std::fmt;

use chrono::TimeZone;
use pnet_packet::ethernet::EthernetPacket;
use wire_tap::{Nanos, NANOS_PER_SEC};

/// Ethernet header length; everything after it is the payload.
pub const ETH_HEADER_LEN: usize = 14;

/// Bytes written as a `b'...'` literal: printable ASCII as is, the usual
/// escapes for tab, newline and carriage return, `\xNN` for the rest.
pub struct BytesRepr<'a>(pub &'a [u8]);

impl fmt::Display for BytesRepr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quote = if self.0.contains(&b'\'') && !self.0.contains(&b'"') {
            b'"'
        } else {
            b'\''
        };

        write!(f, "b{}", quote as char)?;
        for &b in self.0 {
            match b {
                b'\\' => f.write_str("\\\\")?,
                b'\t' => f.write_str("\\t")?,
                b'\n' => f.write_str("\\n")?,
                b'\r' => f.write_str("\\r")?,
                _ if b == quote => write!(f, "\\{}", b as char)?,
                0x20..=0x7e => write!(f, "{}", b as char)?,
                _ => write!(f, "\\x{b:02x}")?,
            }
        }
        write!(f, "{}", quote as char)
    }
}

/// Wall clock part of a record: `HH:MM:SS` in `tz`, then the nanoseconds.
pub fn clock_time<Tz: TimeZone>(tz: &Tz, time: Nanos) -> String
where
    Tz::Offset: fmt::Display,
{
    let secs = (time / NANOS_PER_SEC) as i64;
    let nanos = time % NANOS_PER_SEC;
    match tz.timestamp_opt(secs, 0).single() {
        Some(dt) => format!("{}.{nanos:09}", dt.format("%H:%M:%S")),
        None => format!("{secs}.{nanos:09}"),
    }
}

/// Formats one frame, or `None` if it is too short to have an Ethernet
/// header.
pub fn capture_record<Tz: TimeZone>(
    tz: &Tz,
    prefix: Option<&str>,
    time: Nanos,
    frame: &[u8],
    payload_cap: Option<usize>,
) -> Option<String>
where
    Tz::Offset: fmt::Display,
{
    let eth = EthernetPacket::new(frame)?;
    let payload = &frame[ETH_HEADER_LEN..];
    let payload = match payload_cap {
        Some(cap) if cap < payload.len() => &payload[..cap],
        _ => payload,
    };

    let mut line = String::new();
    if let Some(prefix) = prefix {
        line.push_str(prefix);
        line.push(' ');
    }
    line.push_str(&format!(
        "{} \t {} -> {}, type=0x{:04x}, hash={}",
        clock_time(tz, time),
        eth.get_source(),
        eth.get_destination(),
        eth.get_ethertype().0,
        BytesRepr(payload),
    ));
    Some(line)
}

#[cfg(test)]
mod test {
    use chrono::{FixedOffset, Utc};
    use delay_join::{Correlator, InputRecord};
    use pnet_base::MacAddr;

    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(&[0xff; 6]);
        f.extend_from_slice(&[0x00, 0x1b, 0x21, 0xaa, 0xbb, 0xcc]);
        f.extend_from_slice(&[0x08, 0x06]);
        f.extend_from_slice(payload);
        f
    }

    #[test]
    fn test_bytes_repr() {
        assert_eq!(BytesRepr(b"").to_string(), "b''");
        assert_eq!(BytesRepr(b"ab\x00\xff").to_string(), r"b'ab\x00\xff'");
        assert_eq!(BytesRepr(b"\t\n\r\\").to_string(), r"b'\t\n\r\\'");
        assert_eq!(BytesRepr(b"it's").to_string(), r#"b"it's""#);
        assert_eq!(BytesRepr(b"'\"").to_string(), r#"b'\'"'"#);
        assert_eq!(BytesRepr(b"\x7f ~").to_string(), r"b'\x7f ~'");
    }

    #[test]
    fn test_clock_time() {
        // 2023-05-04 13:02:01 UTC
        let t = 1_683_205_321 * NANOS_PER_SEC + 51_234;
        assert_eq!(clock_time(&Utc, t), "13:02:01.000051234");
        let cest = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(clock_time(&cest, t), "15:02:01.000051234");
    }

    #[test]
    fn test_capture_record() {
        let t = 1_683_205_321 * NANOS_PER_SEC + 7;
        let f = frame(b"\x00\x01ab");
        assert_eq!(EthernetPacket::new(&f).unwrap().get_destination(), MacAddr::broadcast());
        assert_eq!(
            capture_record(&Utc, None, t, &f, None).unwrap(),
            "13:02:01.000000007 \t 00:1b:21:aa:bb:cc -> ff:ff:ff:ff:ff:ff, type=0x0806, hash=b'\\x00\\x01ab'"
        );
        assert_eq!(
            capture_record(&Utc, Some("tap1"), t, &f, Some(2)).unwrap(),
            "tap1 13:02:01.000000007 \t 00:1b:21:aa:bb:cc -> ff:ff:ff:ff:ff:ff, type=0x0806, hash=b'\\x00\\x01'"
        );
    }

    #[test]
    fn test_space_runs_stay_distinct() {
        let t = 1_683_205_321 * NANOS_PER_SEC;
        let a = capture_record(&Utc, Some("tap1"), t + 1000, &frame(b"GET  /x"), None).unwrap();
        let b = capture_record(&Utc, Some("tap2"), t + 1500, &frame(b"GET /x"), None).unwrap();

        let mut correlator = Correlator::new("hardware", 0);
        for line in [&a, &b] {
            let rec = InputRecord::parse(line).unwrap().unwrap();
            assert_eq!(correlator.ingest(rec.tap, rec.time, rec.key), None);
        }

        // the same frame at both taps still pairs up
        let c = capture_record(&Utc, Some("tap2"), t + 1700, &frame(b"GET  /x"), None).unwrap();
        let rec = InputRecord::parse(&c).unwrap().unwrap();
        let sample = correlator.ingest(rec.tap, rec.time, rec.key).unwrap();
        assert_eq!(sample.delay, 700);
    }

    #[test]
    fn test_runt() {
        assert_eq!(capture_record(&Utc, None, 0, &[0u8; 13], None), None);
        // header only is fine
        assert!(capture_record(&Utc, None, 0, &frame(b""), None)
            .unwrap()
            .ends_with("hash=b''"));
    }
}
