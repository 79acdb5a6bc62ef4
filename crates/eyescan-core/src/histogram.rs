//! Amplitude histogram over the `[0, 100]` slicer range.

use serde::Serialize;

use crate::config::AMPLITUDE_RANGE;

/// Per-bin counts plus bin edges, fed incrementally.
///
/// The accumulator records how many ring slots it has consumed (`seen`); the
/// slicer buffer uses that checkpoint so no slice is binned twice.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramAccumulator {
    counts: Vec<u64>,
    edges: Vec<f64>,
    seen: u64,
}

impl HistogramAccumulator {
    /// A zero bin count is raised to one.
    pub fn new(bins: usize) -> Self {
        let bins = bins.max(1);
        let width = AMPLITUDE_RANGE / bins as f64;
        Self {
            counts: vec![0; bins],
            edges: (0..=bins).map(|i| i as f64 * width).collect(),
            seen: 0,
        }
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// `bins + 1` monotonically increasing edges from 0 to 100.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Samples binned so far.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub(crate) fn seen(&self) -> u64 {
        self.seen
    }

    pub(crate) fn mark_seen(&mut self, seen: u64) {
        self.seen = seen;
    }

    /// Bin a batch of amplitudes. Values outside `[0, 100]` and NaN are dropped;
    /// 100 itself lands in the last bin.
    pub fn add_samples(&mut self, samples: &[f64]) {
        for &v in samples {
            if let Some(i) = self.bin_index(v) {
                self.counts[i] += 1;
            }
        }
    }

    fn bin_index(&self, v: f64) -> Option<usize> {
        if !(0.0..=AMPLITUDE_RANGE).contains(&v) {
            return None;
        }
        let bins = self.counts.len();
        let i = (v / AMPLITUDE_RANGE * bins as f64) as usize;
        Some(i.min(bins - 1))
    }
}
