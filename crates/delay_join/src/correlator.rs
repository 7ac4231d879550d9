// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! The two-table join.
//!
//! Each key is either unmatched (sitting in the table of the tap that saw it)
//! or matched (gone from both tables, reported once). A record first looks
//! for its key in the other tap's table; on a hit that entry is consumed and
//! a sample is produced, otherwise the record becomes its own tap's pending
//! entry for the key.

use std::sync::Arc;

use crate::{pending::PendingTable, record::TapId};

/// One matched pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelaySample {
    /// 0 for the first sample of a session, counting up by one.
    pub rep: u64,
    pub label: Arc<str>,
    /// `time2 - time1` plus the calibration offset.
    pub delay: i64,
    pub time1: i64,
    pub time2: i64,
}

#[derive(Debug)]
pub struct Correlator {
    pending: [PendingTable; 2],
    emitted: u64,
    offset: i64,
    label: Arc<str>,
}

impl Correlator {
    pub fn new(label: &str, offset: i64) -> Correlator {
        Correlator {
            pending: Default::default(),
            emitted: 0,
            offset,
            label: label.into(),
        }
    }

    /// Feeds one observation. Returns a sample if `key` was waiting at the
    /// other tap.
    ///
    /// The delay is always tap2's time minus tap1's, whichever of them
    /// completed the pair.
    pub fn ingest(&mut self, tap: TapId, time: i64, key: String) -> Option<DelaySample> {
        let Some(other_time) = self.pending[tap.other().index()].take(&key) else {
            if let Some(stale) = self.pending[tap.index()].insert(key, time) {
                tracing::trace!("{tap}: replaced unmatched entry from {stale} with {time}");
            }
            return None;
        };

        let (time1, time2) = match tap {
            TapId::Tap1 => (time, other_time),
            TapId::Tap2 => (other_time, time),
        };

        let rep = self.emitted;
        self.emitted += 1;

        Some(DelaySample {
            rep,
            label: self.label.clone(),
            delay: time2.saturating_sub(time1).saturating_add(self.offset),
            time1,
            time2,
        })
    }

    pub fn pending(&self, tap: TapId) -> &PendingTable {
        &self.pending[tap.index()]
    }

    /// Number of samples produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use TapId::*;

    fn feed(c: &mut Correlator, lines: &[(TapId, i64, &str)]) -> Vec<DelaySample> {
        lines
            .iter()
            .filter_map(|&(tap, time, key)| c.ingest(tap, time, key.to_owned()))
            .collect()
    }

    #[test]
    fn test_tap2_completes() {
        let mut c = Correlator::new("hardware", 0);
        let got = feed(&mut c, &[(Tap1, 1000, "AA BB CC"), (Tap2, 1500, "AA BB CC")]);
        assert_eq!(
            got,
            vec![DelaySample {
                rep: 0,
                label: "hardware".into(),
                delay: 500,
                time1: 1000,
                time2: 1500,
            }]
        );
        assert!(c.pending(Tap1).is_empty());
        assert!(c.pending(Tap2).is_empty());
    }

    #[test]
    fn test_tap1_completes() {
        let mut c = Correlator::new("hardware", 0);
        let got = feed(&mut c, &[(Tap2, 1500, "k"), (Tap1, 1000, "k")]);
        assert_eq!(got.len(), 1);
        assert_eq!((got[0].delay, got[0].time1, got[0].time2), (500, 1000, 1500));

        // tap1 later than tap2: negative delay
        let got = feed(&mut c, &[(Tap2, 100, "j"), (Tap1, 400, "j")]);
        assert_eq!(got[0].delay, -300);
        assert_eq!(got[0].rep, 1);
    }

    #[test]
    fn test_offset() {
        let mut c = Correlator::new("hardware", -200);
        let got = feed(&mut c, &[(Tap1, 1000, "AA BB CC"), (Tap2, 1500, "AA BB CC")]);
        assert_eq!(got[0].delay, 300);
        assert_eq!((got[0].time1, got[0].time2), (1000, 1500));
    }

    #[test]
    fn test_duplicate_overwrites() {
        let mut c = Correlator::new("hardware", 0);
        let got = feed(&mut c, &[(Tap1, 1000, "X"), (Tap1, 2000, "X"), (Tap2, 2500, "X")]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].delay, 500);
        assert_eq!(got[0].time1, 2000);
        assert!(c.pending(Tap1).is_empty());
    }

    #[test]
    fn test_one_shot() {
        let mut c = Correlator::new("hardware", 0);
        let got = feed(
            &mut c,
            &[(Tap1, 1, "X"), (Tap2, 2, "X"), (Tap2, 3, "X"), (Tap1, 5, "only-here")],
        );
        assert_eq!(got.len(), 1);
        // the second tap2 observation waits for a new tap1 one
        assert!(c.pending(Tap2).contains("X"));
        assert!(c.pending(Tap1).contains("only-here"));
        assert_eq!(c.emitted(), 1);
    }

    proptest! {
        fn pairs_match_in_any_order(
            times in prop::collection::vec((0i64..1_000_000, 0i64..1_000_000), 1..30),
            order in any::<prop::sample::Index>(),
            seed in any::<u64>(),
            offset in -1000i64..1000,
        ) {
            // every key observed once per tap, arrival order shuffled
            let mut events = Vec::new();
            for (i, (t1, t2)) in times.iter().enumerate() {
                events.push((Tap1, *t1, format!("k{i}")));
                events.push((Tap2, *t2, format!("k{i}")));
            }
            let mut state = seed | 1;
            for i in (1..events.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                events.swap(i, (state as usize) % (i + 1));
            }
            let start = order.index(events.len());
            events.rotate_left(start);

            let mut c = Correlator::new("t", offset);
            let mut samples = Vec::new();
            for (tap, time, key) in events {
                samples.extend(c.ingest(tap, time, key));
            }

            prop_assert_eq!(samples.len(), times.len());
            for (n, s) in samples.iter().enumerate() {
                prop_assert_eq!(s.rep, n as u64);
                prop_assert_eq!(s.delay, s.time2 - s.time1 + offset);
            }
            let mut seen: Vec<_> = samples.iter().map(|s| (s.time1, s.time2)).collect();
            let mut want = times.clone();
            seen.sort();
            want.sort();
            prop_assert_eq!(seen, want);
            prop_assert!(c.pending(Tap1).is_empty());
            prop_assert!(c.pending(Tap2).is_empty());
        }
    }

    #[test]
    fn test_order_independence() {
        pairs_match_in_any_order();
    }
}
