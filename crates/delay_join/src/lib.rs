// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Pairs up observations of the same frame at two taps and reports the
//! one-way delay between them.
//!
//! Input is one record per line (see [`record`]). A [`Session`] parses each
//! line, feeds it to the [`Correlator`], and hands every resulting
//! [`DelaySample`] to a [`SampleSink`].

use std::io::{self, BufRead};

pub mod correlator;
pub mod pending;
pub mod record;
pub mod sink;

pub use correlator::{Correlator, DelaySample};
pub use record::{InputRecord, ParseError, TapId};
pub use sink::{ConsoleSink, CsvLog, SampleSink};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed input on line {line_no}: {line:?}")]
    Malformed {
        line_no: u64,
        line: String,
        #[source]
        reason: ParseError,
    },
    #[error("sample output: {0}")]
    Io(#[from] io::Error),
}

/// What to do with a line that does not parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// End the session with [`Error::Malformed`].
    #[default]
    Fatal,
    /// Warn, count it, and keep going.
    Skip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub samples: u64,
    pub skipped: u64,
    pub unmatched_tap1: usize,
    pub unmatched_tap2: usize,
}

pub struct Session<S: SampleSink> {
    correlator: Correlator,
    sink: S,
    policy: MalformedPolicy,
    line_no: u64,
    skipped: u64,
}

impl<S: SampleSink> Session<S> {
    pub fn new(correlator: Correlator, sink: S, policy: MalformedPolicy) -> Session<S> {
        Session {
            correlator,
            sink,
            policy,
            line_no: 0,
            skipped: 0,
        }
    }

    /// Processes one input line. On a fatal error the sink has already been
    /// flushed.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<DelaySample>, Error> {
        self.line_no += 1;

        let record = match InputRecord::parse(line) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(reason) => return self.malformed(line, reason).map(|()| None),
        };

        let text = record.text;
        let Some(sample) = self
            .correlator
            .ingest(record.tap, record.time, record.key)
        else {
            return Ok(None);
        };

        tracing::trace!(rep = sample.rep, delay = sample.delay, "matched");
        if let Err(e) = self.sink.on_sample(&sample, text) {
            if let Err(flush_err) = self.sink.flush() {
                tracing::warn!("flushing sample output: {flush_err}");
            }
            return Err(e.into());
        }
        Ok(Some(sample))
    }

    /// Like [`Session::feed_line`], for a line that may not be UTF-8. Such a
    /// line is malformed.
    pub fn feed_bytes(&mut self, line: &[u8]) -> Result<Option<DelaySample>, Error> {
        match std::str::from_utf8(line) {
            Ok(line) => self.feed_line(line),
            Err(_) => {
                self.line_no += 1;
                let lossy = String::from_utf8_lossy(line);
                self.malformed(&lossy, ParseError::NotUtf8).map(|()| None)
            }
        }
    }

    fn malformed(&mut self, line: &str, reason: ParseError) -> Result<(), Error> {
        match self.policy {
            MalformedPolicy::Skip => {
                tracing::warn!("skipping line {}: {reason}: {:?}", self.line_no, line.trim_end());
                self.skipped += 1;
                Ok(())
            }
            MalformedPolicy::Fatal => {
                if let Err(e) = self.sink.flush() {
                    tracing::warn!("flushing sample output: {e}");
                }
                Err(Error::Malformed {
                    line_no: self.line_no,
                    line: line.trim_end().to_owned(),
                    reason,
                })
            }
        }
    }

    /// Feeds every line of `input` until end of file.
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<(), Error> {
        for line in input.split(b'\n') {
            self.feed_bytes(&line?)?;
        }
        Ok(())
    }

    pub fn summary(&self) -> Summary {
        Summary {
            samples: self.correlator.emitted(),
            skipped: self.skipped,
            unmatched_tap1: self.correlator.pending(TapId::Tap1).len(),
            unmatched_tap2: self.correlator.pending(TapId::Tap2).len(),
        }
    }

    /// Flushes the sink and gives it back along with the final counts.
    pub fn finish(mut self) -> Result<(S, Summary), Error> {
        self.sink.flush()?;
        let summary = self.summary();
        Ok((self.sink, summary))
    }
}
