/// Fixed-size circular log of RTP timestamps
///
/// Used by the receiver to remember which timestamps arrived as primaries,
/// and which were recovered by RED or FEC. Membership is a linear scan; the
/// window is small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketLog {
    slots: Vec<Option<u32>>,
    next: usize,
}

impl PacketLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Record a timestamp, overwriting the oldest slot.
    pub fn insert(&mut self, timestamp: u32) {
        self.slots[self.next] = Some(timestamp);
        self.next = (self.next + 1) % self.slots.len();
    }

    pub fn contains(&self, timestamp: u32) -> bool {
        self.slots.iter().any(|slot| *slot == Some(timestamp))
    }

    /// Forget a timestamp. Returns true if it was present.
    pub fn remove(&mut self, timestamp: u32) -> bool {
        match self.slots.iter_mut().find(|slot| **slot == Some(timestamp)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let mut log = PacketLog::new(4);
        log.insert(960);
        assert!(log.contains(960));
        assert!(!log.contains(1920));
    }

    #[test]
    fn test_zero_timestamp_is_tracked() {
        let mut log = PacketLog::new(4);
        assert!(!log.contains(0));
        log.insert(0);
        assert!(log.contains(0));
        assert!(log.remove(0));
        assert!(!log.contains(0));
    }

    #[test]
    fn test_overwrites_oldest() {
        let mut log = PacketLog::new(3);
        for ts in [1, 2, 3, 4] {
            log.insert(ts);
        }
        assert!(!log.contains(1));
        assert!(log.contains(2));
        assert!(log.contains(4));
    }

    #[test]
    fn test_remove_missing() {
        let mut log = PacketLog::new(2);
        log.insert(5);
        assert!(!log.remove(6));
        assert!(log.contains(5));
    }

    #[test]
    fn test_clear() {
        let mut log = PacketLog::new(2);
        log.insert(5);
        log.clear();
        assert!(!log.contains(5));
        assert_eq!(log.capacity(), 2);
    }
}
