//! Running statistics and the per-poll link status comment.

use serde::Serialize;

use crate::hardware::LinkReading;

/// BER above which a link is reported with diagnostics instead of statistics.
pub const BER_ALARM: f64 = 1e-5;

/// Streaming min / max / mean / variance (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl SeriesStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        if self.count == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Standard deviation with `n - 1` in the denominator; 0 below two samples.
    pub fn sample_std(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    /// Standard deviation with `n` in the denominator.
    pub fn population_std(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}

impl FromIterator<f64> for SeriesStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = SeriesStats::new();
        for x in iter {
            stats.push(x);
        }
        stats
    }
}

/// Whether a reading needs the pattern-checker diagnostics.
pub fn needs_diagnostics(reading: &LinkReading) -> bool {
    !reading.is_linked() || reading.ber > BER_ALARM
}

/// Comment column for one poll.
///
/// A healthy link gets its BER and SNR history; a down or erroring link gets
/// the probe diagnostics.
pub fn link_comment(
    reading: &LinkReading,
    ber: &SeriesStats,
    snr: &SeriesStats,
    diagnostics: Option<&str>,
) -> String {
    if needs_diagnostics(reading) {
        return diagnostics
            .map(str::to_string)
            .unwrap_or_else(|| format!("LinkStatus='{}'", reading.status));
    }
    format!(
        "BER: ({:.2e}, {:.2e}) mean={:.2e} std={:.2e}    SNR: ({:.2e}, {:.2e}) mean={:.2e} std={:.2e}",
        ber.min(),
        ber.max(),
        ber.mean(),
        ber.sample_std(),
        snr.min(),
        snr.max(),
        snr.mean(),
        snr.sample_std()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NO_LINK;

    #[test]
    fn test_series_stats_basic() {
        let s: SeriesStats = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().collect();
        assert_eq!(s.count(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.population_std() - 2.0).abs() < 1e-12);
        assert!((s.sample_std() - 2.138_089_935).abs() < 1e-6);
        assert_eq!(s.min(), 2.0);
        assert_eq!(s.max(), 9.0);
    }

    #[test]
    fn test_series_stats_ignores_non_finite() {
        let s: SeriesStats = [1.0, f64::NAN, 3.0, f64::INFINITY].into_iter().collect();
        assert_eq!(s.count(), 2);
        assert!((s.mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_sample_std_is_zero() {
        let s: SeriesStats = [1.5].into_iter().collect();
        assert_eq!(s.sample_std(), 0.0);
        assert_eq!(s.population_std(), 0.0);
    }

    fn reading(status: &str, ber: f64) -> LinkReading {
        LinkReading {
            status: status.to_string(),
            line_rate: "53.125 Gbps".to_string(),
            bit_count: 1_000_000,
            error_count: 0,
            ber,
        }
    }

    #[test]
    fn test_comment_healthy_link_has_history() {
        let ber: SeriesStats = [1e-12, 2e-12].into_iter().collect();
        let snr: SeriesStats = [19.0, 21.0].into_iter().collect();
        let c = link_comment(&reading("53 Gbps", 1e-12), &ber, &snr, None);
        assert!(c.starts_with("BER: (1.00e-12, 2.00e-12)"));
        assert!(c.contains("SNR: (1.90e1, 2.10e1) mean=2.00e1"));
    }

    #[test]
    fn test_comment_no_link_uses_diagnostics() {
        let s = SeriesStats::new();
        let c = link_comment(&reading(NO_LINK, 0.0), &s, &s, Some("LockStatus='false'"));
        assert_eq!(c, "LockStatus='false'");
        let c = link_comment(&reading(NO_LINK, 0.0), &s, &s, None);
        assert_eq!(c, "LinkStatus='No link'");
    }

    #[test]
    fn test_comment_high_ber_uses_diagnostics() {
        let s = SeriesStats::new();
        assert!(needs_diagnostics(&reading("53 Gbps", 2e-5)));
        let c = link_comment(&reading("53 Gbps", 2e-5), &s, &s, Some("diag"));
        assert_eq!(c, "diag");
    }
}
