//! Live per-link metrics and the snapshots handed to view sinks.

use serde::Serialize;

use crate::analyzer::PeakReport;
use crate::estimator::ErrorRateEstimate;
use crate::fsm::FsmState;
use crate::hardware::LinkReading;

/// Scalar state of one link, updated by every poll and every analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkMetrics {
    pub status: String,
    pub line_rate: String,
    pub bit_count: u64,
    pub error_count: u64,
    pub ber: f64,
    /// Latest SNR (dB) delivered with a slice.
    pub snr: f64,
    /// Mean level spacing in amplitude units.
    pub eye_opening: f64,
    pub per: Option<f64>,
    pub hist_summary: String,
    pub per_summary: String,
    /// Status comment of the latest poll.
    pub comment: String,
}

impl LinkMetrics {
    pub fn apply_reading(&mut self, reading: &LinkReading) {
        self.status.clone_from(&reading.status);
        self.line_rate.clone_from(&reading.line_rate);
        self.bit_count = reading.bit_count;
        self.error_count = reading.error_count;
        self.ber = reading.ber;
    }

    pub fn apply_peaks(&mut self, report: &PeakReport) {
        self.eye_opening = report.eye_opening;
        self.hist_summary.clone_from(&report.summary);
    }

    pub fn apply_estimate(&mut self, estimate: Option<&ErrorRateEstimate>) {
        match estimate {
            Some(e) => {
                self.per = Some(e.per);
                self.per_summary.clone_from(&e.text);
            }
            None => {
                self.per = None;
                self.per_summary.clear();
            }
        }
    }
}

/// Point-in-time view of a link for tables and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub link_id: usize,
    pub name: String,
    pub state: FsmState,
    pub engine_running: bool,
    pub metrics: LinkMetrics,
    /// Real slices received.
    pub scans: u64,
    /// Synchronous polls done.
    pub polls: u64,
    pub elapsed_secs: f64,
    pub peaks: Option<PeakReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Modulation;

    #[test]
    fn test_apply_reading_copies_counters() {
        let mut m = LinkMetrics::default();
        m.apply_reading(&LinkReading {
            status: "53 Gbps".into(),
            line_rate: "53 Gbps".into(),
            bit_count: 10,
            error_count: 1,
            ber: 0.1,
        });
        assert_eq!(m.status, "53 Gbps");
        assert_eq!(m.bit_count, 10);
        assert_eq!(m.ber, 0.1);
    }

    #[test]
    fn test_apply_peaks_and_clear_estimate() {
        let mut m = LinkMetrics {
            per: Some(1e-3),
            per_summary: "PER=1e-3".into(),
            ..Default::default()
        };
        m.apply_peaks(&PeakReport {
            modulation: Modulation::Pam4,
            peaks: vec![20, 40, 60, 80],
            valleys: vec![30, 50, 70],
            eye_opening: 20.0,
            summary: "Peaks".into(),
        });
        m.apply_estimate(None);
        assert_eq!(m.eye_opening, 20.0);
        assert_eq!(m.hist_summary, "Peaks");
        assert!(m.per.is_none());
        assert!(m.per_summary.is_empty());
    }
}
