//! Sender-side history of recently sent primary encodings
//!
//! Supplies the payloads that get repeated as redundant blocks. Only
//! "important" encodings (CELT-only, or SILK/Hybrid with voice activity) are
//! kept; silence is not worth the bytes.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::trace;

use super::{is_important, timestamp_diff, Encoding};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: u32,
    pub payload: Bytes,
}

impl HistoryEntry {
    pub fn to_redundant(&self) -> Encoding {
        Encoding::redundant(self.timestamp, self.payload.clone())
    }
}

/// Oldest-to-newest list of sent encodings, bounded in count and age.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct EncodingHistory {
    entries: VecDeque<HistoryEntry>,
    max_size: usize,
    /// Entries at least this old (in timestamp units) are dropped.
    max_age: u32,
}

impl EncodingHistory {
    pub fn new(max_size: usize, max_age: u32) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
            max_age,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Drop entries too old to be recovered at `primary_timestamp`.
    ///
    /// Entries that appear newer than the primary (negative age) are kept.
    pub fn prune(&mut self, primary_timestamp: u32) {
        while let Some(front) = self.entries.front() {
            let age = timestamp_diff(primary_timestamp, front.timestamp);
            if age < 0 || (age as u32) < self.max_age {
                break;
            }
            trace!("Pruning history entry ts={} (age {})", front.timestamp, age);
            self.entries.pop_front();
        }
    }

    /// Append the encoding if it is worth repeating. Returns whether it was kept.
    ///
    /// A full history drops its oldest entry.
    pub fn maybe_add(&mut self, timestamp: u32, payload: Bytes) -> bool {
        if !is_important(&payload) || self.max_size == 0 {
            return false;
        }
        while self.entries.len() >= self.max_size {
            if let Some(evicted) = self.entries.pop_front() {
                trace!("Encoding history full, evicting ts={}", evicted.timestamp);
            }
        }
        self.entries.push_back(HistoryEntry { timestamp, payload });
        true
    }

    /// Prune against the new primary, then offer it for storage.
    pub fn update(&mut self, timestamp: u32, payload: Bytes) -> bool {
        self.prune(timestamp);
        self.maybe_add(timestamp, payload)
    }

    pub fn find(&self, timestamp: u32) -> Option<&HistoryEntry> {
        self.entries.iter().find(|entry| entry.timestamp == timestamp)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::red::{MAX_RECOVERY_DISTANCE, PACKETIZATION_TIME};

    const MAX_AGE: u32 = PACKETIZATION_TIME * MAX_RECOVERY_DISTANCE;

    fn voiced() -> Bytes {
        Bytes::from_static(&[9 << 3, 0x80, 0x11])
    }

    fn silent() -> Bytes {
        Bytes::from_static(&[9 << 3, 0x00, 0x11])
    }

    #[test]
    fn test_only_important_added() {
        let mut history = EncodingHistory::new(10, MAX_AGE);
        assert!(history.maybe_add(0, voiced()));
        assert!(!history.maybe_add(960, silent()));
        assert!(history.maybe_add(1920, Bytes::from_static(&[31 << 3, 0x00])));
        assert_eq!(history.len(), 2);
        assert!(history.find(960).is_none());
    }

    #[test]
    fn test_prune_by_age() {
        let mut history = EncodingHistory::new(10, MAX_AGE);
        for i in 0..6 {
            history.maybe_add(i * 960, voiced());
        }
        // At ts 4800, ts 0 is exactly 5 intervals old
        history.prune(4800);
        assert!(history.find(0).is_none());
        assert!(history.find(960).is_some());
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn test_prune_across_wraparound() {
        let mut history = EncodingHistory::new(10, MAX_AGE);
        history.maybe_add(u32::MAX - 959, voiced());
        history.prune(960);
        assert_eq!(history.len(), 1);
        history.prune((u32::MAX - 959).wrapping_add(MAX_AGE));
        assert!(history.is_empty());
    }

    #[test]
    fn test_prune_keeps_newer_entries() {
        let mut history = EncodingHistory::new(10, MAX_AGE);
        history.maybe_add(9600, voiced());
        history.prune(0);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = EncodingHistory::new(0, MAX_AGE);
        assert!(!history.maybe_add(0, voiced()));
        assert!(history.is_empty());
    }

    #[test]
    fn test_full_history_evicts_oldest() {
        let mut history = EncodingHistory::new(3, u32::MAX);
        for i in 0..3 {
            history.maybe_add(i * 960, voiced());
        }
        assert_eq!(history.len(), 3);
        history.maybe_add(3 * 960, voiced());
        history.maybe_add(4 * 960, voiced());
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
            vec![1920, 2880, 3840]
        );
    }

    #[test]
    fn test_update_prunes_then_adds() {
        let mut history = EncodingHistory::new(10, MAX_AGE);
        history.update(0, voiced());
        history.update(960 * 5, voiced());
        assert_eq!(history.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![4800]);
    }
}
