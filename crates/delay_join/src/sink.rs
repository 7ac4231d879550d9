// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Where delay samples go once they are found.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use crate::correlator::DelaySample;

pub const CSV_HEADER: &str = "rep;type;delay;time1;time2";

/// Receives every sample in the order the matches were discovered.
pub trait SampleSink {
    /// `text` is the input line (after the tap identifier) that completed the
    /// match.
    fn on_sample(&mut self, sample: &DelaySample, text: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Human readable `delay: ...` lines.
pub struct ConsoleSink<W: Write> {
    writer: W,
    width: Option<usize>,
}

impl<W: Write> ConsoleSink<W> {
    /// Packet text is cut to `width` characters if given.
    pub fn new(writer: W, width: Option<usize>) -> ConsoleSink<W> {
        ConsoleSink { writer, width }
    }
}

fn truncate_chars(s: &str, width: Option<usize>) -> &str {
    match width.and_then(|w| s.char_indices().nth(w)) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

impl<W: Write> SampleSink for ConsoleSink<W> {
    fn on_sample(&mut self, sample: &DelaySample, text: &str) -> io::Result<()> {
        let text = truncate_chars(text.trim_end(), self.width);
        writeln!(self.writer, "delay: {} ns,   packet: {}", sample.delay, text)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// The semicolon separated sample log. Rows are flushed one at a time so the
/// file is complete up to the last sample however the process ends.
pub struct CsvLog<W: Write> {
    writer: W,
}

impl<W: Write> CsvLog<W> {
    pub fn new(mut writer: W, write_header: bool) -> io::Result<CsvLog<W>> {
        if write_header {
            writeln!(writer, "{CSV_HEADER}")?;
            writer.flush()?;
        }
        Ok(CsvLog { writer })
    }
}

impl CsvLog<fs::File> {
    /// Appends to `path`, creating it if needed. The header goes in only if
    /// the file is empty.
    pub fn open(path: &Path) -> io::Result<CsvLog<fs::File>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let empty = file.metadata()?.len() == 0;
        CsvLog::new(file, empty)
    }
}

impl<W: Write> SampleSink for CsvLog<W> {
    fn on_sample(&mut self, sample: &DelaySample, _text: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "{};{};{};{};{}",
            sample.rep, sample.label, sample.delay, sample.time1, sample.time2
        )?;
        self.writer.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl SampleSink for Vec<Box<dyn SampleSink>> {
    fn on_sample(&mut self, sample: &DelaySample, text: &str) -> io::Result<()> {
        for sink in self.iter_mut() {
            sink.on_sample(sample, text)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in self.iter_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}

impl<S: SampleSink + ?Sized> SampleSink for &mut S {
    fn on_sample(&mut self, sample: &DelaySample, text: &str) -> io::Result<()> {
        (**self).on_sample(sample, text)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;

    use super::*;

    fn sample(rep: u64, delay: i64, time1: i64, time2: i64) -> DelaySample {
        DelaySample {
            rep,
            label: "hardware".into(),
            delay,
            time1,
            time2,
        }
    }

    #[test]
    fn test_console_line() {
        let mut out = Vec::new();
        let mut sink = ConsoleSink::new(&mut out, Some(12));
        sink.on_sample(&sample(0, 500, 1000, 1500), "0.1500 AA BB CC DD EE\n")
            .unwrap();
        sink.on_sample(&sample(1, -3, 7, 4), "0.4 k").unwrap();
        drop(sink);

        expect![[r#"
            delay: 500 ns,   packet: 0.1500 AA BB
            delay: -3 ns,   packet: 0.4 k
        "#]]
        .assert_eq(&String::from_utf8(out).unwrap());
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_chars("ééé", Some(2)), "éé");
        assert_eq!(truncate_chars("abc", Some(5)), "abc");
        assert_eq!(truncate_chars("abc", None), "abc");
    }

    #[test]
    fn test_csv_rows() {
        let mut out = Vec::new();
        let mut log = CsvLog::new(&mut out, true).unwrap();
        log.on_sample(&sample(0, 300, 1000, 1500), "").unwrap();
        log.on_sample(&sample(1, 12, 5, 17), "").unwrap();
        drop(log);

        expect![[r#"
            rep;type;delay;time1;time2
            0;hardware;300;1000;1500
            1;hardware;12;5;17
        "#]]
        .assert_eq(&String::from_utf8(out).unwrap());
    }

    #[test]
    fn test_csv_append_keeps_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ts_hardware.csv");

        let mut log = CsvLog::open(&path).unwrap();
        log.on_sample(&sample(0, 1, 1, 2), "").unwrap();
        drop(log);

        let mut log = CsvLog::open(&path).unwrap();
        log.on_sample(&sample(0, 2, 1, 3), "").unwrap();
        drop(log);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "rep;type;delay;time1;time2\n0;hardware;1;1;2\n0;hardware;2;1;3\n"
        );
    }

    #[test]
    fn test_fanout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut sinks: Vec<Box<dyn SampleSink>> = vec![
            Box::new(ConsoleSink::new(io::sink(), None)),
            Box::new(CsvLog::open(&path).unwrap()),
        ];
        sinks.on_sample(&sample(0, 9, 1, 10), "x").unwrap();
        sinks.flush().unwrap();
        drop(sinks);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
