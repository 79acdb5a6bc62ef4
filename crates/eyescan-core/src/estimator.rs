//! Probability-of-error (PER) estimate for PAM4 slicer data.
//!
//! The raw samples are split into four level populations using the peak
//! midpoints of each histogram half and the fixed mid-scale cut at 50. Each
//! population is modelled as a Normal distribution; the decision boundary
//! between two adjacent levels is the midpoint of their means. PER is the sum
//! of the six one-sided tails that cross those boundaries.
//!
//! This assumes Gaussian levels and is only meaningful when the peaks are
//! well separated, hence the width guard.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::{AMPLITUDE_RANGE, Modulation, ScanConfig};
use crate::stats::SeriesStats;

/// Tunables for the estimate.
#[derive(Debug, Clone, Copy)]
pub struct PerSettings {
    pub bin_width: f64,
    /// Minimum gap in bins between the two peaks of each half.
    pub min_width: usize,
    pub pam4_threshold_gbps: u32,
}

impl From<&ScanConfig> for PerSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            bin_width: config.bin_width(),
            min_width: config.per_min_width,
            pam4_threshold_gbps: config.pam4_threshold_gbps,
        }
    }
}

impl Default for PerSettings {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

/// Descriptive statistics of one amplitude level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelStats {
    pub count: u64,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl From<&SeriesStats> for LevelStats {
    fn from(s: &SeriesStats) -> Self {
        Self {
            count: s.count(),
            mean: s.mean(),
            std: s.population_std(),
            min: s.min(),
            max: s.max(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRateEstimate {
    pub per: f64,
    pub levels: [LevelStats; 4],
    /// Decision boundaries between levels 0/1, 1/2 and 2/3.
    pub boundaries: [f64; 3],
    pub text: String,
}

/// Estimate PER from raw amplitudes and the four PAM4 peak bins.
///
/// Returns `None` for NRZ rates, badly separated peaks, an empty level or a
/// level with zero spread.
pub fn estimate<I>(
    samples: I,
    peaks: &[usize],
    data_rate_gbps: u32,
    settings: &PerSettings,
) -> Option<ErrorRateEstimate>
where
    I: IntoIterator<Item = f64>,
{
    if data_rate_gbps <= settings.pam4_threshold_gbps || peaks.len() != Modulation::Pam4.levels() {
        return None;
    }
    if peaks[1].saturating_sub(peaks[0]) < settings.min_width
        || peaks[3].saturating_sub(peaks[2]) < settings.min_width
    {
        log::trace!("peaks {peaks:?} too close for a PER estimate");
        return None;
    }

    let mid = AMPLITUDE_RANGE / 2.0;
    let valley0 = (peaks[0] + peaks[1]) as f64 / 2.0 * settings.bin_width;
    let valley2 = (peaks[2] + peaks[3]) as f64 / 2.0 * settings.bin_width;

    let mut populations = [SeriesStats::new(); 4];
    for x in samples {
        if !(0.0..=AMPLITUDE_RANGE).contains(&x) {
            continue;
        }
        let level = if x < valley0 {
            0
        } else if x < mid {
            1
        } else if x < valley2 {
            2
        } else {
            3
        };
        populations[level].push(x);
    }

    let levels = populations.map(|p| LevelStats::from(&p));
    let mut normals = Vec::with_capacity(4);
    for level in &levels {
        if level.count == 0 {
            log::trace!("empty PAM4 level; no PER estimate");
            return None;
        }
        normals.push(Normal::new(level.mean, level.std).ok()?);
    }

    let mut boundaries = [0.0; 3];
    let mut per = 0.0;
    for k in 0..3 {
        let b = (levels[k].mean + levels[k + 1].mean) / 2.0;
        boundaries[k] = b;
        per += (1.0 - normals[k].cdf(b)) + normals[k + 1].cdf(b);
    }

    let text = format!(
        "PER={:.3e}  mean=({:.1}, {:.1}, {:.1}, {:.1})  std=({:.2}, {:.2}, {:.2}, {:.2})",
        per,
        levels[0].mean,
        levels[1].mean,
        levels[2].mean,
        levels[3].mean,
        levels[0].std,
        levels[1].std,
        levels[2].std,
        levels[3].std
    );

    Some(ErrorRateEstimate {
        per,
        levels,
        boundaries,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evenly spread values within ±spread of each center.
    fn levels(centers: &[f64], spread: f64, per_level: usize) -> Vec<f64> {
        let mut out = Vec::new();
        for &c in centers {
            for k in 0..per_level {
                let t = k as f64 / (per_level - 1) as f64;
                out.push(c - spread + 2.0 * spread * t);
            }
        }
        out
    }

    #[test]
    fn test_narrow_peaks_decline() {
        let samples = levels(&[20.0, 40.0, 60.0, 80.0], 2.0, 50);
        assert!(estimate(samples, &[5, 6, 55, 56], 53, &PerSettings::default()).is_none());
    }

    #[test]
    fn test_nrz_rate_declines() {
        let samples = levels(&[20.0, 40.0, 60.0, 80.0], 2.0, 50);
        assert!(estimate(samples, &[20, 40, 60, 80], 25, &PerSettings::default()).is_none());
    }

    #[test]
    fn test_empty_level_declines() {
        let samples = levels(&[20.0, 40.0, 60.0], 2.0, 50);
        assert!(estimate(samples, &[20, 40, 60, 80], 53, &PerSettings::default()).is_none());
    }

    #[test]
    fn test_zero_spread_declines() {
        let samples = vec![20.0, 40.0, 60.0, 80.0];
        assert!(estimate(samples, &[20, 40, 60, 80], 53, &PerSettings::default()).is_none());
    }

    #[test]
    fn test_well_separated_levels() {
        let samples = levels(&[20.0, 40.0, 60.0, 80.0], 2.0, 101);
        let est = estimate(samples, &[20, 40, 60, 80], 53, &PerSettings::default()).unwrap();
        for (level, center) in est.levels.iter().zip([20.0, 40.0, 60.0, 80.0]) {
            assert!((level.mean - center).abs() < 1e-9);
            assert_eq!(level.count, 101);
            assert!((level.min - (center - 2.0)).abs() < 1e-9);
        }
        assert!((est.boundaries[0] - 30.0).abs() < 1e-9);
        assert!((est.boundaries[1] - 50.0).abs() < 1e-9);
        assert!(est.per >= 0.0 && est.per < 1e-6);
        assert!(est.text.starts_with("PER="));
    }

    #[test]
    fn test_wider_levels_raise_per() {
        let tight = estimate(
            levels(&[20.0, 40.0, 60.0, 80.0], 2.0, 101),
            &[20, 40, 60, 80],
            53,
            &PerSettings::default(),
        )
        .unwrap();
        let wide = estimate(
            levels(&[20.0, 40.0, 60.0, 80.0], 9.0, 101),
            &[20, 40, 60, 80],
            53,
            &PerSettings::default(),
        )
        .unwrap();
        assert!(wide.per > tight.per);
        assert!(wide.per > 1e-4);
    }
}
