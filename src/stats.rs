use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::red::loss::LossStatistics;

/// Periodic receive-side recovery report for one stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LossReport {
    /// Synchronization source of the stream, when the transport supplied one
    pub ssrc: Option<u32>,
    #[serde(flatten)]
    pub statistics: LossStatistics,
    pub reported_at: DateTime<Utc>,
}

impl LossReport {
    pub fn new(ssrc: Option<u32>, statistics: LossStatistics) -> Self {
        Self {
            ssrc,
            statistics,
            reported_at: Utc::now(),
        }
    }

    /// Share of lost packets later recovered by RED or FEC, in percent
    pub fn recovery_percent(&self) -> f64 {
        let lost = self.statistics.total_audio_packets_lost;
        if lost == 0 {
            return 0.0;
        }
        let recovered = self.statistics.total_audio_packets_recovered_red
            + self.statistics.total_audio_packets_recovered_fec;
        (100.0 * recovered as f64 / lost as f64).min(100.0)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl std::fmt::Display for LossReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = &self.statistics;
        write!(
            f,
            "expected={}, lost={}, recovered_red={}, recovered_fec={} ({:.1}% recovered)",
            stats.total_audio_packets_expected,
            stats.total_audio_packets_lost,
            stats.total_audio_packets_recovered_red,
            stats.total_audio_packets_recovered_fec,
            self.recovery_percent()
        )
    }
}

/// Receives loss reports from a receive transform.
pub trait StatsSink {
    fn report(&mut self, report: &LossReport);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsSink;

impl StatsSink for NoopStatsSink {
    fn report(&mut self, _report: &LossReport) {}
}

/// Logs each report as JSON at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn report(&mut self, report: &LossReport) {
        info!(ssrc = ?report.ssrc, "Audio redundancy stats: {}", report.to_json());
    }
}

impl StatsSink for mpsc::UnboundedSender<LossReport> {
    fn report(&mut self, report: &LossReport) {
        if self.send(report.clone()).is_err() {
            warn!("Stats receiver dropped, discarding loss report");
        }
    }
}

/// Adapts a closure into a sink.
pub struct FnStatsSink<F>(pub F);

impl<F> StatsSink for FnStatsSink<F>
where
    F: FnMut(&LossReport),
{
    fn report(&mut self, report: &LossReport) {
        (self.0)(report)
    }
}
