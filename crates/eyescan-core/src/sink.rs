//! View sinks: where link workers push redraws and samples.
//!
//! Sinks are called from link worker threads and must not block for long.
//! They receive snapshots, so readers never see a buffer mid-mutation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::analyzer::PeakReport;
use crate::link::Link;
use crate::metrics::LinkSnapshot;
use crate::slicer::Slice;

/// One synchronous poll, as plotted on BER/SNR trends.
#[derive(Debug, Clone)]
pub struct BerSample {
    pub poll: u64,
    pub elapsed_secs: f64,
    pub status: String,
    pub ber: f64,
    pub snr: f64,
    pub bit_count: u64,
    pub error_count: u64,
}

/// One eye refresh: the slices to scatter plus the cumulative histogram.
#[derive(Debug, Clone)]
pub struct EyeSample {
    pub view: Vec<Slice>,
    pub histogram: Vec<u64>,
    pub edges: Vec<f64>,
    pub report: Option<PeakReport>,
    pub snr: f64,
}

/// Receiver of link events. All methods default to no-ops.
pub trait ViewSink: Send + Sync {
    fn redraw(&self, _snapshot: &LinkSnapshot) {}

    fn ber_sample(&self, _link: &Link, _sample: &BerSample) {}

    fn eye_sample(&self, _link: &Link, _sample: &EyeSample) {}
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl ViewSink for NullSink {}

// ---------------------------------------------------------------------------
// Dashboard board
// ---------------------------------------------------------------------------

/// Trend depth kept per link.
pub const MAX_HISTORY: usize = 120;

/// Latest state of one link as kept by [`DashboardBoard`].
#[derive(Debug, Clone, Default)]
pub struct LinkBoard {
    pub snapshot: Option<LinkSnapshot>,
    pub ber_trend: VecDeque<f64>,
    pub snr_trend: VecDeque<f64>,
    pub histogram: Vec<u64>,
    pub report: Option<PeakReport>,
}

/// Thread-safe board of the latest per-link state, read by front ends.
#[derive(Debug)]
pub struct DashboardBoard {
    links: Mutex<BTreeMap<usize, LinkBoard>>,
    history: usize,
}

impl Default for DashboardBoard {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}

impl DashboardBoard {
    pub fn new(history: usize) -> Self {
        Self {
            links: Mutex::new(BTreeMap::new()),
            history: history.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<usize, LinkBoard>> {
        self.links.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Latest snapshots, ordered by link id.
    pub fn snapshots(&self) -> Vec<LinkSnapshot> {
        self.lock()
            .values()
            .filter_map(|b| b.snapshot.clone())
            .collect()
    }

    pub fn board(&self, link_id: usize) -> Option<LinkBoard> {
        self.lock().get(&link_id).cloned()
    }

    fn push_trend(trend: &mut VecDeque<f64>, value: f64, cap: usize) {
        trend.push_back(value);
        while trend.len() > cap {
            trend.pop_front();
        }
    }
}

impl ViewSink for DashboardBoard {
    fn redraw(&self, snapshot: &LinkSnapshot) {
        self.lock().entry(snapshot.link_id).or_default().snapshot = Some(snapshot.clone());
    }

    fn ber_sample(&self, link: &Link, sample: &BerSample) {
        let cap = self.history;
        let mut links = self.lock();
        let board = links.entry(link.id).or_default();
        Self::push_trend(&mut board.ber_trend, sample.ber, cap);
        Self::push_trend(&mut board.snr_trend, sample.snr, cap);
    }

    fn eye_sample(&self, link: &Link, sample: &EyeSample) {
        let mut links = self.lock();
        let board = links.entry(link.id).or_default();
        board.histogram.clone_from(&sample.histogram);
        if sample.report.is_some() {
            board.report.clone_from(&sample.report);
        }
    }
}
