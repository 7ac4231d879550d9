// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;

/// Records seen at one tap that the other tap has not matched yet, by join
/// key.
///
/// There is no eviction: a key whose frame never shows up at the other tap
/// stays here for the rest of the session.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<String, i64>,
}

impl PendingTable {
    /// Remembers `time` for `key`, replacing (and returning) any earlier
    /// unmatched time for the same key.
    pub fn insert(&mut self, key: String, time: i64) -> Option<i64> {
        self.entries.insert(key, time)
    }

    /// Removes and returns the pending time for `key`.
    pub fn take(&mut self, key: &str) -> Option<i64> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
