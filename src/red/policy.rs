//! Redundancy policy
//!
//! Maps measured uplink packet loss to a redundancy level and drives the
//! sender's control surface from periodic send/loss counters.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::worker::ControlMessage;

const MAX_METRICS_HISTORY: usize = 20;
const SHORT_EVAL_PERIOD_MS: i64 = 5_000;
const LONG_EVAL_PERIOD_MS: i64 = 15_000;
const HOLD_DOWN_MS: i64 = 5 * 60 * 1000;
const RECOVERY_TIME_MS: i64 = 60 * 1000;

/// Recommended (redundant encodings, force redundancy off) for a loss percentage.
///
/// Extreme loss turns redundancy off to avoid congestion collapse.
pub fn num_redundant_encodings_for_packet_loss(loss_percent: f64) -> (usize, bool) {
    if loss_percent <= 8.0 {
        (0, false)
    } else if loss_percent <= 18.0 {
        (1, false)
    } else if loss_percent <= 75.0 {
        (2, false)
    } else {
        (0, true)
    }
}

/// Cumulative uplink counters as of one receiver report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMetricsSample {
    /// When the receiver report arrived
    pub timestamp_ms: i64,
    pub total_packets_sent: u64,
    pub total_packets_lost: u64,
}

/// Turns uplink loss measurements into control messages for the sender.
///
/// Increases take effect immediately; decreases wait out a hold-down period.
/// Sustained extreme loss disables redundancy for at least a minute.
#[derive(Debug, Clone)]
pub struct RedundancyController {
    history: VecDeque<AudioMetricsSample>,
    redundancy_enabled: bool,
    current_num_redundant_encodings: usize,
    hold_down_start_ms: i64,
    last_high_loss_ms: i64,
    last_turn_off_ms: i64,
}

impl Default for RedundancyController {
    fn default() -> Self {
        Self::new()
    }
}

impl RedundancyController {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_METRICS_HISTORY + 1),
            redundancy_enabled: true,
            current_num_redundant_encodings: 0,
            hold_down_start_ms: 0,
            last_high_loss_ms: 0,
            last_turn_off_ms: 0,
        }
    }

    pub fn redundancy_enabled(&self) -> bool {
        self.redundancy_enabled
    }

    pub fn num_redundant_encodings(&self) -> usize {
        self.current_num_redundant_encodings
    }

    /// Forget collected samples.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Feed one metrics sample taken at `now_ms`; returns messages for the sender.
    pub fn on_metrics(&mut self, now_ms: i64, sample: AudioMetricsSample) -> Vec<ControlMessage> {
        let mut messages = Vec::new();

        // Only a new receiver report with more packets sent is a new data point.
        let accept = match self.history.back() {
            None => true,
            Some(last) => {
                sample.timestamp_ms > last.timestamp_ms
                    && sample.total_packets_sent > last.total_packets_sent
            }
        };
        if accept {
            self.history.push_back(sample);
        }
        if self.history.len() > MAX_METRICS_HISTORY {
            self.history.pop_front();
        }

        let loss_percent = self
            .loss_percent(SHORT_EVAL_PERIOD_MS)
            .max(self.loss_percent(LONG_EVAL_PERIOD_MS));
        let (num_encodings, turn_off) = num_redundant_encodings_for_packet_loss(loss_percent);

        if turn_off {
            self.last_high_loss_ms = now_ms;
            if self.redundancy_enabled {
                info!("Disabling audio redundancy at {:.1}% loss", loss_percent);
                self.redundancy_enabled = false;
                self.last_turn_off_ms = now_ms;
                messages.push(ControlMessage::Disable);
            }
            return messages;
        }

        if !self.redundancy_enabled {
            let since_off = now_ms - self.last_turn_off_ms;
            let since_high_loss = now_ms - self.last_high_loss_ms;
            if since_off >= LONG_EVAL_PERIOD_MS && since_high_loss < RECOVERY_TIME_MS {
                return messages;
            }
            info!("Re-enabling audio redundancy at {:.1}% loss", loss_percent);
            self.redundancy_enabled = true;
            messages.push(ControlMessage::Enable);
            self.maybe_reset_hold_down(now_ms);
        }

        if self.should_update(now_ms, num_encodings) {
            info!(
                "Updating redundant encodings to {} ({:.1}% loss)",
                num_encodings, loss_percent
            );
            messages.push(ControlMessage::UpdateNumRedundantEncodings(num_encodings));
        }

        messages
    }

    /// Loss percentage between the newest sample and the first one at least
    /// `window_ms` older. Zero when history does not reach back that far.
    fn loss_percent(&self, window_ms: i64) -> f64 {
        let Some(latest) = self.history.back() else {
            return 0.0;
        };
        if self.history.len() < 2 {
            return 0.0;
        }

        self.history
            .iter()
            .rev()
            .skip(1)
            .find(|sample| latest.timestamp_ms - sample.timestamp_ms >= window_ms)
            .map(|sample| {
                let lost = latest.total_packets_lost as f64 - sample.total_packets_lost as f64;
                let sent = latest.total_packets_sent as f64 - sample.total_packets_sent as f64;
                if sent <= 0.0 {
                    return 0.0;
                }
                (100.0 * lost / sent).clamp(0.0, 100.0)
            })
            .unwrap_or(0.0)
    }

    fn should_update(&mut self, now_ms: i64, num_encodings: usize) -> bool {
        if num_encodings == self.current_num_redundant_encodings {
            self.maybe_reset_hold_down(now_ms);
            return false;
        }
        let held = now_ms - self.hold_down_start_ms;
        if num_encodings < self.current_num_redundant_encodings && held < HOLD_DOWN_MS {
            debug!(
                "Redundancy hold-down active: {}s / {}s",
                held / 1000,
                HOLD_DOWN_MS / 1000
            );
            return false;
        }
        self.current_num_redundant_encodings = num_encodings;
        self.maybe_reset_hold_down(now_ms);
        true
    }

    fn maybe_reset_hold_down(&mut self, now_ms: i64) {
        if self.current_num_redundant_encodings > 0 {
            self.hold_down_start_ms = now_ms;
        }
    }
}
