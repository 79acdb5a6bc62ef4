//! Peak and valley detection on slicer histograms.
//!
//! NRZ histograms have one level per half of the amplitude range. PAM4
//! histograms have two levels per half, and the two can sit close enough to
//! merge into one broad hill, so the second peak is searched at least
//! `hill_min_width` bins away from the first, on whichever side holds the
//! larger secondary maximum. When no second peak can be found the search
//! degrades to a synthetic neighbour one bin away instead of failing.

use std::ops::Range;

use serde::Serialize;

use crate::config::{AMPLITUDE_RANGE, Modulation, ScanConfig};

/// Tunables for the peak search.
#[derive(Debug, Clone, Copy)]
pub struct PeakSearch {
    pub hist_bins: usize,
    pub hill_min_width: usize,
    pub pam4_threshold_gbps: u32,
}

impl From<&ScanConfig> for PeakSearch {
    fn from(config: &ScanConfig) -> Self {
        Self {
            hist_bins: config.hist_bins,
            hill_min_width: config.hill_min_width,
            pam4_threshold_gbps: config.pam4_threshold_gbps,
        }
    }
}

impl Default for PeakSearch {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

/// Levels and eyes found in one histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakReport {
    pub modulation: Modulation,
    /// Peak bin indices, ascending. Two for NRZ, four for PAM4.
    pub peaks: Vec<usize>,
    /// Minimum-count bin between each pair of consecutive peaks.
    pub valleys: Vec<usize>,
    /// Mean peak spacing in amplitude units.
    pub eye_opening: f64,
    pub summary: String,
}

/// Locate level peaks and inter-level valleys.
///
/// Returns `None` when the histogram does not have `hist_bins` bins or holds
/// no samples. The result depends only on the counts.
pub fn find_peaks_and_valleys(
    counts: &[u64],
    edges: &[f64],
    data_rate_gbps: u32,
    search: &PeakSearch,
) -> Option<PeakReport> {
    if counts.len() != search.hist_bins || counts.len() < 4 {
        log::debug!(
            "histogram has {} bins, expected {}; skipping peak search",
            counts.len(),
            search.hist_bins
        );
        return None;
    }
    if counts.iter().all(|&c| c == 0) {
        return None;
    }

    let bins = counts.len();
    let bin_width = if edges.len() == bins + 1 {
        (edges[bins] - edges[0]) / bins as f64
    } else {
        AMPLITUDE_RANGE / bins as f64
    };
    let half = bins / 2;
    let modulation = Modulation::for_rate(data_rate_gbps, search.pam4_threshold_gbps);

    let peaks = match modulation {
        Modulation::Nrz => vec![argmax(counts, 0..half), argmax(counts, half..bins)],
        Modulation::Pam4 => {
            let w = search.hill_min_width;
            let (p0, p1) = peak_pair(counts, 0..half, w, Side::Left);
            let (p2, p3) = peak_pair(counts, half..bins, w, Side::Right);
            vec![p0, p1, p2, p3]
        }
    };
    debug_assert_eq!(peaks.len(), modulation.levels());

    let valleys: Vec<usize> = peaks
        .windows(2)
        .map(|pair| valley_between(counts, pair[0], pair[1]))
        .collect();

    let span = peaks[peaks.len() - 1] - peaks[0];
    let eye_opening = span as f64 / (peaks.len() - 1) as f64 * bin_width;

    let summary = summarize(counts, &peaks, &valleys);
    Some(PeakReport {
        modulation,
        peaks,
        valleys,
        eye_opening,
        summary,
    })
}

/// Direction a synthetic neighbour is placed first.
#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// Two peaks inside `range`, ascending.
fn peak_pair(counts: &[u64], range: Range<usize>, width: usize, synthetic: Side) -> (usize, usize) {
    let i = argmax(counts, range.clone());

    let left = if i >= range.start + width {
        range.start..i - width
    } else {
        range.start..range.start
    };
    let right = if i + width < range.end {
        i + width..range.end
    } else {
        range.end..range.end
    };

    let left_best = (!left.is_empty()).then(|| argmax(counts, left));
    let right_best = (!right.is_empty()).then(|| argmax(counts, right));

    let second = match (left_best, right_best) {
        (Some(l), Some(r)) => Some(if counts[l] < counts[r] { r } else { l }),
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
    .filter(|&j| counts[j] > 0);

    let j = second.unwrap_or_else(|| adjacent(i, &range, synthetic));
    (i.min(j), i.max(j))
}

/// A neighbour of `i` inside `range`, preferring `side`.
fn adjacent(i: usize, range: &Range<usize>, side: Side) -> usize {
    let below = (i > range.start).then(|| i - 1);
    let above = (i + 1 < range.end).then(|| i + 1);
    let pick = match side {
        Side::Left => below.or(above),
        Side::Right => above.or(below),
    };
    pick.unwrap_or(i)
}

fn valley_between(counts: &[u64], a: usize, b: usize) -> usize {
    if b > a + 1 { argmin(counts, a + 1..b) } else { a }
}

/// First index of the maximum count in a non-empty range.
fn argmax(counts: &[u64], range: Range<usize>) -> usize {
    let start = range.start;
    counts[range]
        .iter()
        .enumerate()
        .fold((start, 0u64, true), |(best, max, first), (k, &c)| {
            if first || c > max {
                (start + k, c, false)
            } else {
                (best, max, false)
            }
        })
        .0
}

/// First index of the minimum count in a non-empty range.
fn argmin(counts: &[u64], range: Range<usize>) -> usize {
    let start = range.start;
    counts[range]
        .iter()
        .enumerate()
        .fold((start, u64::MAX, true), |(best, min, first), (k, &c)| {
            if first || c < min {
                (start + k, c, false)
            } else {
                (best, min, false)
            }
        })
        .0
}

fn summarize(counts: &[u64], peaks: &[usize], valleys: &[usize]) -> String {
    let peaks_text: Vec<String> = peaks.iter().map(|&p| format!("{p}={}", counts[p])).collect();
    let valleys_text: Vec<String> = valleys.iter().map(|v| v.to_string()).collect();
    if valleys.len() == 1 {
        format!("Peaks: ({})   Valleys: {}", peaks_text.join(", "), valleys_text[0])
    } else {
        format!(
            "Peaks: ({})   Valleys: ({})",
            peaks_text.join(", "),
            valleys_text.join(", ")
        )
    }
}
