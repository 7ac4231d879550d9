// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Parsing of correlator input lines.
//!
//! A line is `<tap> <anything>.<nanoseconds> <key...>`, whitespace separated.
//! Only the integer after the last `.` of the second token is used as the
//! time; everything after it is the join key, kept byte for byte apart from
//! the whitespace at either end.

use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TapId {
    Tap1,
    Tap2,
}

impl TapId {
    pub fn other(self) -> TapId {
        match self {
            TapId::Tap1 => TapId::Tap2,
            TapId::Tap2 => TapId::Tap1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TapId::Tap1 => "tap1",
            TapId::Tap2 => "tap2",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            TapId::Tap1 => 0,
            TapId::Tap2 => 1,
        }
    }
}

impl fmt::Display for TapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TapId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tap1" => Ok(TapId::Tap1),
            "tap2" => Ok(TapId::Tap2),
            other => Err(ParseError::UnknownTap(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown tap identifier {0:?}")]
    UnknownTap(String),
    #[error("no timestamp token")]
    MissingTimestamp,
    #[error("timestamp {0:?} has no '.'")]
    NoFraction(String),
    #[error("timestamp {0:?} does not end in integer nanoseconds")]
    BadNanos(String),
    #[error("line is not valid UTF-8")]
    NotUtf8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputRecord<'a> {
    pub tap: TapId,
    pub time: i64,
    /// The rest of the line after the timestamp, trimmed at both ends.
    pub key: String,
    /// The line after the tap identifier, for display.
    pub text: &'a str,
}

impl<'a> InputRecord<'a> {
    /// Returns `Ok(None)` for a line with nothing but whitespace.
    pub fn parse(line: &'a str) -> Result<Option<InputRecord<'a>>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (tap, text) = split_token(line);
        let tap: TapId = tap.parse()?;

        let (stamp, rest) = split_token(text);
        if stamp.is_empty() {
            return Err(ParseError::MissingTimestamp);
        }
        let (_, nanos) = stamp
            .rsplit_once('.')
            .ok_or_else(|| ParseError::NoFraction(stamp.to_owned()))?;
        let time = nanos
            .parse::<i64>()
            .map_err(|_| ParseError::BadNanos(stamp.to_owned()))?;

        // payload bytes may contain runs of spaces; those must not collapse
        let key = rest.to_owned();

        Ok(Some(InputRecord {
            tap,
            time,
            key,
            text,
        }))
    }
}

/// Splits off the first whitespace-delimited token of `s`, which has no
/// leading whitespace. The remainder comes back with leading whitespace
/// removed.
fn split_token(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], s[end..].trim_start()),
        None => (s, ""),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let rec = InputRecord::parse("tap1 0.1000 AA BB CC\n").unwrap().unwrap();
        assert_eq!(
            rec,
            InputRecord {
                tap: TapId::Tap1,
                time: 1000,
                key: "AA BB CC".into(),
                text: "0.1000 AA BB CC",
            }
        );
    }

    #[test]
    fn test_parse_capture_line() {
        let line = "tap2 14:03:07.000051234 \t 00:1b:21:aa:bb:cc -> ff:ff:ff:ff:ff:ff, type=0x0806, hash=b'\\x00\\x01'";
        let rec = InputRecord::parse(line).unwrap().unwrap();
        assert_eq!(rec.tap, TapId::Tap2);
        assert_eq!(rec.time, 51234);
        assert_eq!(
            rec.key,
            "00:1b:21:aa:bb:cc -> ff:ff:ff:ff:ff:ff, type=0x0806, hash=b'\\x00\\x01'"
        );
    }

    #[test]
    fn test_key_keeps_inner_whitespace() {
        let a = InputRecord::parse("tap1 0.1  hash=b'GET  /x'  \n").unwrap().unwrap();
        let b = InputRecord::parse("tap2 0.2\thash=b'GET /x'").unwrap().unwrap();
        assert_eq!(a.key, "hash=b'GET  /x'");
        assert_eq!(b.key, "hash=b'GET /x'");
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            InputRecord::parse("tap3 0.1 x"),
            Err(ParseError::UnknownTap("tap3".into()))
        );
        assert_eq!(InputRecord::parse("tap1"), Err(ParseError::MissingTimestamp));
        assert_eq!(
            InputRecord::parse("tap1 1000 x"),
            Err(ParseError::NoFraction("1000".into()))
        );
        assert_eq!(
            InputRecord::parse("tap1 0.1e3 x"),
            Err(ParseError::BadNanos("0.1e3".into()))
        );
        assert_eq!(InputRecord::parse("   \n"), Ok(None));
    }

    #[test]
    fn test_last_dot_wins() {
        let rec = InputRecord::parse("tap1 1.2.345 k").unwrap().unwrap();
        assert_eq!(rec.time, 345);
    }
}
