//! Hardware collaborator contract.
//!
//! The acquisition core talks to the debug-core session only through these
//! traits. A real backend wraps the vendor session; [`crate::sim`] provides a
//! simulated one, and tests plug in mocks.

use serde::{Deserialize, Serialize};

use crate::config::NO_LINK;
use crate::error::HardwareError;
use crate::link::Link;

/// Data delivered by one acquisition callback.
#[derive(Debug, Clone)]
pub struct ScanUpdate {
    /// Most recent slice amplitudes, nominally in `[0, 100]`.
    pub slicer: Vec<f64>,
    /// SNR in dB reported with the slice.
    pub snr: f64,
}

/// Callback invoked by the engine whenever new scan data is ready.
///
/// Runs on a thread owned by the hardware layer, so it must only hand the
/// data off.
pub type UpdatesCallback = Box<dyn Fn(ScanUpdate) + Send + Sync>;

/// One synchronous read of a link's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkReading {
    pub status: String,
    pub line_rate: String,
    pub bit_count: u64,
    pub error_count: u64,
    pub ber: f64,
}

impl LinkReading {
    /// Whether the receiver reports lock.
    pub fn is_linked(&self) -> bool {
        self.status != NO_LINK
    }
}

/// Synchronous access to a link's BER counters and reset controls.
pub trait LinkProbe: Send {
    fn read(&mut self) -> Result<LinkReading, HardwareError>;

    fn reset_tx(&mut self) -> Result<(), HardwareError>;

    fn reset_rx(&mut self) -> Result<(), HardwareError>;

    /// Pattern-checker details used when the link is down or erroring.
    fn diagnostics(&mut self) -> Result<String, HardwareError> {
        let reading = self.read()?;
        Ok(format!(
            "LinkStatus='{}'   LineRate={}   ErrorCount='{}'",
            reading.status, reading.line_rate, reading.error_count
        ))
    }
}

/// A YK eye-scan engine attached to one receiver.
///
/// `start` and `stop` may be called repeatedly; callers track state and
/// never rely on the engine to ignore redundant calls.
pub trait AcquisitionEngine: Send {
    fn start(&mut self) -> Result<(), HardwareError>;

    fn stop(&mut self) -> Result<(), HardwareError>;

    fn set_updates_callback(&mut self, callback: UpdatesCallback);
}

/// Factory for per-link probes and engines.
pub trait Hardware: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn probe(&self, link: &Link) -> Result<Box<dyn LinkProbe>, HardwareError>;

    fn create_acquisition(&self, link: &Link) -> Result<Box<dyn AcquisitionEngine>, HardwareError>;
}
