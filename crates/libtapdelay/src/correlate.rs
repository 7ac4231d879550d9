// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Driving a correlation session from a line stream.

use std::{future::Future, io, path::PathBuf};

use chrono::{DateTime, Local, TimeZone};
use delay_join::{ConsoleSink, Correlator, CsvLog, SampleSink, Session, Summary};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::{config::CorrelateConfig, Error, Shutdown};

/// Fills in the log path: `TYPE` first, then `TIME`.
pub fn expand_log_template<Tz: TimeZone>(template: &str, label: &str, now: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    let time = now.format("%Y-%m-%d_%H-%M-%S").to_string();
    template.replace("TYPE", label).replace("TIME", &time).into()
}

/// Feeds lines until end of input or until `stop` resolves.
async fn feed_lines<R, S, F>(session: &mut Session<S>, input: R, stop: F) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
    S: SampleSink,
    F: Future<Output = io::Result<()>>,
{
    let mut lines = input.split(b'\n');
    tokio::pin!(stop);

    loop {
        tokio::select! {
            r = &mut stop => {
                r?;
                tracing::info!("interrupted");
                return Ok(());
            }
            line = lines.next_segment() => match line? {
                Some(line) => {
                    session.feed_bytes(&line)?;
                }
                None => return Ok(()),
            }
        }
    }
}

fn log_summary(summary: &Summary) {
    tracing::info!(
        samples = summary.samples,
        skipped = summary.skipped,
        unmatched_tap1 = summary.unmatched_tap1,
        unmatched_tap2 = summary.unmatched_tap2,
        "correlation finished"
    );
}

async fn correlate(config: &CorrelateConfig) -> Result<(), Error> {
    let mut shutdown = Shutdown::register()?;

    let mut sinks: Vec<Box<dyn SampleSink>> =
        vec![Box::new(ConsoleSink::new(io::stdout(), config.display_cap))];

    if let Some(template) = &config.log_template {
        let path = expand_log_template(template, &config.type_label, &Local::now());
        let log = CsvLog::open(&path)
            .map_err(|e| format!("opening sample log {}: {e}", path.display()))?;
        tracing::info!("logging samples to {}", path.display());
        sinks.push(Box::new(log));
    }

    let correlator = Correlator::new(&config.type_label, config.offset_ns);
    let mut session = Session::new(correlator, sinks, config.malformed);

    let input: Box<dyn AsyncBufRead + Unpin> = match &config.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    feed_lines(&mut session, input, shutdown.wait()).await?;

    let (_, summary) = session.finish()?;
    log_summary(&summary);
    Ok(())
}

/// Runs a session to the end of input or the first SIGINT/SIGTERM.
pub fn do_correlate(config: &CorrelateConfig) -> Result<(), Error> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = rt.block_on(correlate(config));
    // a read of stdin may still be parked on the blocking pool
    rt.shutdown_background();
    result
}

#[cfg(test)]
mod test {
    use chrono::FixedOffset;
    use delay_join::{DelaySample, MalformedPolicy};

    use super::*;

    #[test]
    fn test_expand_log_template() {
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2023, 5, 4, 13, 2, 1)
            .unwrap();
        assert_eq!(
            expand_log_template("/tmp/ts_TYPE_TIME.csv", "hardware", &now),
            PathBuf::from("/tmp/ts_hardware_2023-05-04_13-02-01.csv")
        );
        assert_eq!(
            expand_log_template("delays.csv", "hardware", &now),
            PathBuf::from("delays.csv")
        );
    }

    #[derive(Default)]
    struct Collect(Vec<DelaySample>);

    impl SampleSink for Collect {
        fn on_sample(&mut self, sample: &DelaySample, _text: &str) -> io::Result<()> {
            self.0.push(sample.clone());
            Ok(())
        }
    }

    fn block_on<F: Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn test_feed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.txt");
        std::fs::write(
            &path,
            "tap1 10:00:00.000001000 a b\ntap2 10:00:00.000001700 a b\ntap2 10:00:00.5 c\n",
        )
        .unwrap();

        let mut session = Session::new(
            Correlator::new("hardware", 0),
            Collect::default(),
            MalformedPolicy::Fatal,
        );
        block_on(async {
            let file = tokio::fs::File::open(&path).await.unwrap();
            feed_lines(&mut session, BufReader::new(file), std::future::pending())
                .await
                .unwrap();
        });

        let (sink, summary) = session.finish().unwrap();
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].delay, 700);
        assert_eq!(summary.unmatched_tap2, 1);
    }

    #[test]
    fn test_stop_ends_session() {
        let mut session = Session::new(
            Correlator::new("hardware", 0),
            Collect::default(),
            MalformedPolicy::Fatal,
        );
        // the input never ends; the stop future does
        let (_tx, rx) = tokio::io::duplex(64);
        block_on(feed_lines(
            &mut session,
            BufReader::new(rx),
            std::future::ready(Ok(())),
        ))
        .unwrap();
        assert_eq!(session.summary().samples, 0);
    }

    #[test]
    fn test_malformed_stops_feed() {
        let mut session = Session::new(
            Correlator::new("hardware", 0),
            Collect::default(),
            MalformedPolicy::Fatal,
        );
        let input: &[u8] = b"tap1 0.1 k\nbogus\ntap2 0.2 k\n";
        let err = block_on(feed_lines(&mut session, input, std::future::pending())).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
        assert_eq!(session.summary().samples, 0);
    }

    #[test]
    fn test_undecodable_line_is_skipped() {
        let mut session = Session::new(
            Correlator::new("hardware", 0),
            Collect::default(),
            MalformedPolicy::Skip,
        );
        let input: &[u8] = b"tap1 0.1 k\ntap2 0.15 \xc3(\ntap2 0.2 k\n";
        block_on(feed_lines(&mut session, input, std::future::pending())).unwrap();
        let summary = session.summary();
        assert_eq!((summary.samples, summary.skipped), (1, 1));
    }
}
