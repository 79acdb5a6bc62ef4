//! Circular slicer buffer: the most recent eye-scan slices of one link.
//!
//! The buffer is owned by a single link worker. The acquisition callback
//! never touches it directly; slices reach it through the worker's mailbox,
//! so appends and reads are serialized on one thread.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::SliceError;
use crate::histogram::HistogramAccumulator;

/// One eye-scan sample vector. Cheap to clone; padding and view windows
/// share the underlying samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice(Arc<[f64]>);

impl Slice {
    pub fn samples(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for Slice {
    fn from(samples: Vec<f64>) -> Self {
        Slice(samples.into())
    }
}

impl Deref for Slice {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

/// Result of [`SlicerBuffer::fill_to_capacity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// No real slice has arrived yet; call again later.
    Waiting,
    /// Fill already happened; nothing changed.
    AlreadyFilled,
    /// The ring was topped up with `padded` duplicated slices.
    Filled { padded: usize },
}

/// Bounded FIFO of slices with a rotating view cursor and an incremental
/// histogram.
#[derive(Debug)]
pub struct SlicerBuffer {
    slices: VecDeque<Slice>,
    capacity: usize,
    slice_len: usize,
    view_cursor: usize,
    /// Every push, padding included. Drives the histogram checkpoint.
    appended: u64,
    /// Real slices accepted from the engine.
    received: u64,
    filled: bool,
    histogram: HistogramAccumulator,
}

impl SlicerBuffer {
    pub fn new(capacity: usize, slice_len: usize, hist_bins: usize) -> Self {
        Self {
            slices: VecDeque::with_capacity(capacity + 1),
            capacity,
            slice_len,
            view_cursor: 0,
            appended: 0,
            received: 0,
            filled: false,
            histogram: HistogramAccumulator::new(hist_bins),
        }
    }

    /// Append a real slice, evicting the oldest past capacity.
    ///
    /// Returns the backlog (slices not yet binned into the histogram).
    /// A slice of the wrong length is rejected and the buffer is unchanged.
    pub fn append(&mut self, slice: Slice) -> Result<usize, SliceError> {
        if slice.len() != self.slice_len {
            return Err(SliceError::Length {
                expected: self.slice_len,
                got: slice.len(),
            });
        }
        self.push(slice);
        self.received += 1;
        Ok(self.backlog())
    }

    fn push(&mut self, slice: Slice) {
        self.slices.push_back(slice);
        while self.slices.len() > self.capacity {
            self.slices.pop_front();
        }
        self.appended += 1;
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    /// Real slices accepted since creation.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Slices pushed but not yet binned.
    pub fn backlog(&self) -> usize {
        self.appended.saturating_sub(self.histogram.seen()) as usize
    }

    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter()
    }

    /// Every sample currently held, oldest slice first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.slices.iter().flat_map(|s| s.iter().copied())
    }

    pub fn histogram(&self) -> &HistogramAccumulator {
        &self.histogram
    }

    /// Next block of up to `rotation` slices for display.
    ///
    /// The cursor advances by `rotation` and wraps to the start once it
    /// reaches capacity, so successive calls walk the whole ring.
    pub fn view_window(&mut self, rotation: usize) -> Vec<Slice> {
        if self.view_cursor >= self.slices.len() {
            self.view_cursor = 0;
        }
        let start = self.view_cursor;
        let end = (start + rotation).min(self.slices.len());
        self.view_cursor += rotation;
        if self.view_cursor >= self.capacity {
            self.view_cursor = 0;
        }
        self.slices.range(start..end).cloned().collect()
    }

    /// Pad the ring to capacity by cycling through the slices received so far.
    ///
    /// Runs once. With no real slice yet it returns [`FillOutcome::Waiting`]
    /// and leaves the flag unset so the caller can retry.
    pub fn fill_to_capacity(&mut self) -> FillOutcome {
        if self.filled {
            return FillOutcome::AlreadyFilled;
        }
        let count = self.slices.len();
        if count == 0 {
            return FillOutcome::Waiting;
        }
        let mut padded = 0;
        for i in count..self.capacity {
            let dup = self.slices[i % count].clone();
            self.push(dup);
            padded += 1;
        }
        self.filled = true;
        FillOutcome::Filled { padded }
    }

    /// Bin the slices pushed since the last call. Returns how many were binned.
    ///
    /// Slices evicted before being binned are skipped.
    pub fn accumulate_histogram(&mut self) -> usize {
        let fresh = self.backlog().min(self.slices.len());
        let skip = self.slices.len() - fresh;
        for slice in self.slices.iter().skip(skip) {
            self.histogram.add_samples(slice);
        }
        self.histogram.mark_seen(self.appended);
        fresh
    }
}
