//! Receiver-side loss and recovery accounting
//!
//! Counts expected and lost primaries from RTP sequence numbers, and credits
//! lost packets that were recovered through a redundant RED block or through
//! Opus in-band FEC carried by the following packet.
//!
//! A later redundant copy takes precedence over an earlier FEC inference for
//! the same timestamp, and a late-arriving primary undoes both.

use serde::Serialize;
use tracing::{debug, trace};

use super::packet_log::PacketLog;
use super::{seq_diff, timestamp_diff, wrap32, Encoding};

/// Snapshot of the running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LossStatistics {
    pub total_audio_packets_expected: u64,
    pub total_audio_packets_lost: u64,
    pub total_audio_packets_recovered_red: u64,
    pub total_audio_packets_recovered_fec: u64,
}

/// Parameters for a [`LossTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossTrackerConfig {
    pub packetization_time: u32,
    pub max_out_of_order_distance: usize,
    pub packet_log_size: usize,
    pub report_interval: u32,
}

impl Default for LossTrackerConfig {
    fn default() -> Self {
        Self {
            packetization_time: super::PACKETIZATION_TIME,
            max_out_of_order_distance: super::MAX_OUT_OF_ORDER_DISTANCE,
            packet_log_size: super::MAX_OUT_OF_ORDER_DISTANCE
                + super::MAX_RECOVERY_DISTANCE as usize,
            report_interval: super::LOSS_REPORT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LossTracker {
    config: LossTrackerConfig,
    stats: LossStatistics,
    newest_sequence_number: u16,
    last_report_timestamp: Option<u32>,
    primary_log: PacketLog,
    red_log: PacketLog,
    fec_log: PacketLog,
}

impl LossTracker {
    pub fn new(config: LossTrackerConfig) -> Self {
        Self {
            config,
            stats: LossStatistics::default(),
            newest_sequence_number: 0,
            last_report_timestamp: None,
            primary_log: PacketLog::new(config.packet_log_size),
            red_log: PacketLog::new(config.packet_log_size),
            fec_log: PacketLog::new(config.packet_log_size),
        }
    }

    pub fn statistics(&self) -> LossStatistics {
        self.stats
    }

    /// Newest primary sequence number, once one has been seen
    pub fn newest_sequence_number(&self) -> Option<u16> {
        (self.stats.total_audio_packets_expected > 0).then_some(self.newest_sequence_number)
    }

    /// Clear all counters and logs.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Account for the blocks of one received RED frame.
    ///
    /// `encodings` is in container order (oldest redundant first, primary
    /// last); the primary is accounted first so its sequence number is known
    /// before redundant blocks are judged. Returns a snapshot when a report
    /// is due.
    pub fn process(&mut self, encodings: &[Encoding]) -> Option<LossStatistics> {
        let primary_timestamp = encodings.last()?.timestamp;

        for encoding in encodings.iter().rev() {
            if self.update_loss(encoding) {
                self.update_red(encoding);
                self.update_fec(encoding);
            }
        }

        self.maybe_report(primary_timestamp)
    }

    /// Returns false if the encoding is too far out of order to account.
    fn update_loss(&mut self, encoding: &Encoding) -> bool {
        if encoding.is_redundant {
            return true;
        }
        let Some(seq) = encoding.sequence_number else {
            trace!("Primary ts={} has no sequence number", encoding.timestamp);
            return false;
        };
        let timestamp = encoding.timestamp;

        if self.stats.total_audio_packets_expected == 0 {
            self.stats.total_audio_packets_expected = 1;
            self.newest_sequence_number = seq;
            self.primary_log.insert(timestamp);
            return true;
        }

        let diff = seq_diff(seq, self.newest_sequence_number) as i64;
        if diff < -(self.config.max_out_of_order_distance as i64) {
            debug!(
                "Dropping stale primary seq={} (newest {})",
                seq, self.newest_sequence_number
            );
            return false;
        }

        if diff < 0 {
            if !self.primary_log.contains(timestamp) {
                trace!("Late primary seq={} ts={}", seq, timestamp);
                self.stats.total_audio_packets_lost =
                    self.stats.total_audio_packets_lost.saturating_sub(1);
                self.primary_log.insert(timestamp);
                self.remove_from_recovery_logs(timestamp);
            }
        } else if diff > 1 {
            self.stats.total_audio_packets_lost += (diff - 1) as u64;
        }

        if diff > 0 {
            self.stats.total_audio_packets_expected += diff as u64;
            self.newest_sequence_number = seq;
            self.primary_log.insert(timestamp);
        }
        true
    }

    fn update_red(&mut self, encoding: &Encoding) {
        if !encoding.is_redundant || self.stats.total_audio_packets_lost == 0 {
            return;
        }
        let timestamp = encoding.timestamp;
        if self.primary_log.contains(timestamp) {
            return;
        }

        if !self.red_log.contains(timestamp) {
            trace!("Recovered ts={} via RED", timestamp);
            self.stats.total_audio_packets_recovered_red += 1;
            self.red_log.insert(timestamp);
        }
        if self.fec_log.remove(timestamp) {
            self.stats.total_audio_packets_recovered_fec =
                self.stats.total_audio_packets_recovered_fec.saturating_sub(1);
        }
    }

    fn update_fec(&mut self, encoding: &Encoding) {
        if self.stats.total_audio_packets_lost == 0 || !encoding.has_fec() {
            return;
        }
        let fec_timestamp =
            wrap32(encoding.timestamp as i64 - self.config.packetization_time as i64);

        if self.primary_log.contains(fec_timestamp)
            || self.red_log.contains(fec_timestamp)
            || self.fec_log.contains(fec_timestamp)
        {
            return;
        }

        trace!("Recovered ts={} via FEC", fec_timestamp);
        self.stats.total_audio_packets_recovered_fec += 1;
        self.fec_log.insert(fec_timestamp);
    }

    fn remove_from_recovery_logs(&mut self, timestamp: u32) {
        if self.red_log.remove(timestamp) {
            self.stats.total_audio_packets_recovered_red =
                self.stats.total_audio_packets_recovered_red.saturating_sub(1);
        }
        if self.fec_log.remove(timestamp) {
            self.stats.total_audio_packets_recovered_fec =
                self.stats.total_audio_packets_recovered_fec.saturating_sub(1);
        }
    }

    /// Emit at most one snapshot per report interval of media time.
    fn maybe_report(&mut self, timestamp: u32) -> Option<LossStatistics> {
        if let Some(last) = self.last_report_timestamp {
            let elapsed = timestamp_diff(timestamp, last) as i64;
            if elapsed < self.config.report_interval as i64 {
                return None;
            }
        }
        self.last_report_timestamp = Some(timestamp);
        Some(self.stats)
    }
}

impl Default for LossTracker {
    fn default() -> Self {
        Self::new(LossTrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // SILK WB 20 ms with the VAD bit set and no LBRR
    const PLAIN: &[u8] = &[9 << 3, 0x80, 0x11];
    // Same, with the LBRR flag set
    const WITH_FEC: &[u8] = &[9 << 3, 0xC0, 0x11];

    fn primary(seq: u16, payload: &'static [u8]) -> Encoding {
        Encoding::primary(seq as u32 * 960, Some(seq), Bytes::from_static(payload))
    }

    fn redundant(seq: u16) -> Encoding {
        Encoding::redundant(seq as u32 * 960, Bytes::from_static(PLAIN))
    }

    #[test]
    fn test_first_packet_seeds_state() {
        let mut tracker = LossTracker::default();
        let report = tracker.process(&[primary(100, PLAIN)]);
        assert_eq!(tracker.newest_sequence_number(), Some(100));
        assert_eq!(tracker.statistics().total_audio_packets_expected, 1);
        // First packet always reports
        assert!(report.is_some());
    }

    #[test]
    fn test_clean_run() {
        let mut tracker = LossTracker::default();
        for seq in 0..50 {
            tracker.process(&[primary(seq, PLAIN)]);
        }
        let stats = tracker.statistics();
        assert_eq!(stats.total_audio_packets_expected, 50);
        assert_eq!(stats.total_audio_packets_lost, 0);
    }

    #[test]
    fn test_gap_counts_loss() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(4, PLAIN)]);
        let stats = tracker.statistics();
        assert_eq!(stats.total_audio_packets_expected, 5);
        assert_eq!(stats.total_audio_packets_lost, 3);
    }

    #[test]
    fn test_late_primary_undoes_loss() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(2, PLAIN)]);
        assert_eq!(tracker.statistics().total_audio_packets_lost, 1);
        tracker.process(&[primary(1, PLAIN)]);
        assert_eq!(tracker.statistics().total_audio_packets_lost, 0);
        assert_eq!(tracker.statistics().total_audio_packets_expected, 3);
        assert_eq!(tracker.newest_sequence_number(), Some(2));
    }

    #[test]
    fn test_stale_primary_ignored() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(30, PLAIN)]);
        let before = tracker.statistics();
        tracker.process(&[primary(5, PLAIN)]);
        assert_eq!(tracker.statistics(), before);
        assert!(!tracker.primary_log.contains(5 * 960));
    }

    #[test]
    fn test_red_recovery() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(1, PLAIN)]);
        // seq 2 lost; seq 3 arrives carrying it
        tracker.process(&[redundant(2), primary(3, PLAIN)]);
        let stats = tracker.statistics();
        assert_eq!(stats.total_audio_packets_lost, 1);
        assert_eq!(stats.total_audio_packets_recovered_red, 1);

        // Same redundant block again in the next packet
        tracker.process(&[redundant(2), primary(4, PLAIN)]);
        assert_eq!(tracker.statistics().total_audio_packets_recovered_red, 1);
    }

    #[test]
    fn test_no_recovery_without_loss() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[redundant(0), primary(1, WITH_FEC)]);
        let stats = tracker.statistics();
        assert_eq!(stats.total_audio_packets_recovered_red, 0);
        assert_eq!(stats.total_audio_packets_recovered_fec, 0);
    }

    #[test]
    fn test_fec_recovery_covers_previous_interval() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        // seq 1 lost; seq 2 carries FEC for it
        tracker.process(&[primary(2, WITH_FEC)]);
        assert_eq!(tracker.statistics().total_audio_packets_recovered_fec, 1);
        assert!(tracker.fec_log.contains(960));
    }

    #[test]
    fn test_red_supersedes_fec() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(2, WITH_FEC)]);
        assert_eq!(tracker.statistics().total_audio_packets_recovered_fec, 1);

        tracker.process(&[redundant(1), primary(3, PLAIN)]);
        let stats = tracker.statistics();
        assert_eq!(stats.total_audio_packets_recovered_red, 1);
        assert_eq!(stats.total_audio_packets_recovered_fec, 0);
    }

    #[test]
    fn test_late_primary_scrubs_recovery() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(2, PLAIN)]);
        tracker.process(&[redundant(1), primary(3, PLAIN)]);
        assert_eq!(tracker.statistics().total_audio_packets_recovered_red, 1);

        tracker.process(&[primary(1, PLAIN)]);
        let stats = tracker.statistics();
        assert_eq!(stats.total_audio_packets_lost, 0);
        assert_eq!(stats.total_audio_packets_recovered_red, 0);
    }

    #[test]
    fn test_duplicate_primary_is_idempotent() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(3, PLAIN)]);
        let before = tracker.statistics();
        tracker.process(&[primary(3, PLAIN)]);
        tracker.process(&[primary(0, PLAIN)]);
        assert_eq!(tracker.statistics(), before);
        assert_eq!(tracker.newest_sequence_number(), Some(3));
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut tracker = LossTracker::default();
        tracker.process(&[Encoding::primary(0, Some(65534), Bytes::from_static(PLAIN))]);
        tracker.process(&[Encoding::primary(1920, Some(0), Bytes::from_static(PLAIN))]);
        let stats = tracker.statistics();
        assert_eq!(stats.total_audio_packets_expected, 3);
        assert_eq!(stats.total_audio_packets_lost, 1);
    }

    #[test]
    fn test_report_interval() {
        let mut tracker = LossTracker::default();
        let mut reports = 0;
        // 20 seconds of 20 ms packets
        for seq in 0..1000u16 {
            if tracker.process(&[primary(seq, PLAIN)]).is_some() {
                reports += 1;
            }
        }
        // ts 0, 240000, 480000, 720000
        assert_eq!(reports, 4);
    }

    #[test]
    fn test_missing_sequence_number_skipped() {
        let mut tracker = LossTracker::default();
        tracker.process(&[Encoding::primary(0, None, Bytes::from_static(PLAIN))]);
        assert_eq!(tracker.statistics().total_audio_packets_expected, 0);
    }

    #[test]
    fn test_reset() {
        let mut tracker = LossTracker::default();
        tracker.process(&[primary(0, PLAIN)]);
        tracker.process(&[primary(5, PLAIN)]);
        tracker.reset();
        assert_eq!(tracker.statistics(), LossStatistics::default());
        assert_eq!(tracker.newest_sequence_number(), None);
    }

    #[test]
    fn test_empty_encodings() {
        let mut tracker = LossTracker::default();
        assert!(tracker.process(&[]).is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Expected never decreases and recovery never exceeds what was lost
        /// plus what was scrubbed.
        #[test]
        fn counters_stay_consistent(
            steps in proptest::collection::vec((-20i32..20, any::<bool>(), any::<bool>()), 1..200)
        ) {
            let mut tracker = LossTracker::default();
            let mut seq: u16 = 1000;
            let mut last_expected = 0;
            for (delta, with_red, with_fec) in steps {
                seq = seq.wrapping_add(delta as u16);
                let ts = (seq as u32).wrapping_mul(960);
                let payload: &'static [u8] = if with_fec { &[9 << 3, 0xC0, 0x11] } else { &[9 << 3, 0x80, 0x11] };
                let mut encodings = Vec::new();
                if with_red {
                    encodings.push(Encoding::redundant(ts.wrapping_sub(1920), Bytes::from_static(payload)));
                }
                encodings.push(Encoding::primary(ts, Some(seq), Bytes::from_static(payload)));
                tracker.process(&encodings);

                let stats = tracker.statistics();
                prop_assert!(stats.total_audio_packets_expected >= last_expected);
                prop_assert!(stats.total_audio_packets_lost <= stats.total_audio_packets_expected);
                last_expected = stats.total_audio_packets_expected;
            }
        }
    }
}
