//! Run configuration.
//!
//! One [`ScanConfig`] is built at startup, validated, and handed to every
//! component as `Arc<ScanConfig>`. All thresholds that shaped the acquisition
//! loop in the field (buffer depth, throttle level, stagger delay, peak search
//! width) live here so they can be tuned per data rate without code changes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Full amplitude scale of a slicer sample.
pub const AMPLITUDE_RANGE: f64 = 100.0;

/// Status string the hardware reports when the receiver has no lock.
pub const NO_LINK: &str = "No link";

// ---------------------------------------------------------------------------
// Modulation
// ---------------------------------------------------------------------------

/// Line modulation, selected from the data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulation {
    /// Two levels, one eye.
    Nrz,
    /// Four levels, three eyes.
    Pam4,
}

impl Modulation {
    /// Data rates strictly above `threshold_gbps` run PAM4.
    pub fn for_rate(data_rate_gbps: u32, threshold_gbps: u32) -> Self {
        if data_rate_gbps > threshold_gbps {
            Modulation::Pam4
        } else {
            Modulation::Nrz
        }
    }

    pub fn levels(self) -> usize {
        match self {
            Modulation::Nrz => 2,
            Modulation::Pam4 => 4,
        }
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modulation::Nrz => write!(f, "NRZ"),
            Modulation::Pam4 => write!(f, "PAM4"),
        }
    }
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

/// How acquisition engines are kept from flooding the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FlowControl {
    /// Each link stops its own engine when its backlog passes
    /// `throttle_threshold`; the watchdog restarts it.
    #[serde(rename = "self")]
    SelfThrottle,
    /// The arena enables one link at a time for `dwell_ms`, pausing
    /// `rotation_pause_ms` after every full rotation.
    Global { dwell_ms: u64, rotation_pause_ms: u64 },
}

impl FlowControl {
    pub fn global_default() -> Self {
        FlowControl::Global {
            dwell_ms: 2000,
            rotation_pause_ms: 5000,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, FlowControl::Global { .. })
    }
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowControl::SelfThrottle => write!(f, "self"),
            FlowControl::Global {
                dwell_ms,
                rotation_pause_ms,
            } => write!(f, "global (dwell {dwell_ms}ms, pause {rotation_pause_ms}ms)"),
        }
    }
}

// ---------------------------------------------------------------------------
// ScanConfig
// ---------------------------------------------------------------------------

/// Read-only parameters of one acquisition run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Samples per eye-scan slice.
    pub slicer_size: usize,
    /// Slices retained per link (ring capacity).
    pub max_slices: usize,
    /// Slices handed to the view per refresh.
    pub view_slices: usize,
    /// Histogram bins over `[0, 100]`.
    pub hist_bins: usize,
    pub data_rate_gbps: u32,
    /// Rates above this run PAM4 analysis.
    pub pam4_threshold_gbps: u32,
    /// Minimum bin distance between the two peaks of one histogram half.
    pub hill_min_width: usize,
    /// Minimum peak-pair gap (bins) for the PER estimate.
    pub per_min_width: usize,
    /// Worker loop period.
    pub tick_ms: u64,
    /// Watchdog period for self-throttled engines.
    pub watchdog_ms: u64,
    /// Start-up delay per link index.
    pub stagger_ms: u64,
    /// Unconsumed slices that trigger a self-throttle stop.
    pub throttle_threshold: usize,
    pub flow_control: FlowControl,
    /// Root directory for CSV logs.
    pub csv_path: PathBuf,
    pub test_id: String,
    /// Board serial used in log file names.
    pub hw_id: String,
    /// PRBS pattern programmed on TX and RX.
    pub pattern: String,
    /// Link name whose per-link debug output is promoted to info.
    pub trace_link: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            slicer_size: 2000,
            max_slices: 12,
            view_slices: 4,
            hist_bins: 100,
            data_rate_gbps: 53,
            pam4_threshold_gbps: 50,
            hill_min_width: 3,
            per_min_width: 5,
            tick_ms: 1000,
            watchdog_ms: 10_000,
            stagger_ms: 4000,
            throttle_threshold: 4,
            flow_control: FlowControl::SelfThrottle,
            csv_path: PathBuf::from("YK_CSV_Files"),
            test_id: String::new(),
            hw_id: "0".to_string(),
            pattern: "PRBS 31".to_string(),
            trace_link: None,
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file; keys that are absent keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("slicer_size", self.slicer_size),
            ("max_slices", self.max_slices),
            ("view_slices", self.view_slices),
            ("per_min_width", self.per_min_width),
            ("tick_ms", self.tick_ms as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.hist_bins < 8 || self.hist_bins % 2 != 0 {
            return Err(ConfigError::HistBins(self.hist_bins));
        }
        if self.view_slices > self.max_slices {
            return Err(ConfigError::ViewWindow {
                view: self.view_slices,
                capacity: self.max_slices,
            });
        }
        Ok(())
    }

    pub fn modulation(&self) -> Modulation {
        Modulation::for_rate(self.data_rate_gbps, self.pam4_threshold_gbps)
    }

    /// Amplitude units per histogram bin.
    pub fn bin_width(&self) -> f64 {
        AMPLITUDE_RANGE / self.hist_bins as f64
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    /// Start-up delay for the link with index `link_id`.
    pub fn stagger_for(&self, link_id: usize) -> Duration {
        Duration::from_millis(self.stagger_ms.saturating_mul(link_id as u64))
    }

    pub fn is_traced(&self, link_name: &str) -> bool {
        self.trace_link.as_deref() == Some(link_name)
    }
}

/// Extract the line rate from a device image name such as `ibert_53G.pdi`.
pub fn data_rate_from_image(image: &str) -> Result<u32, ConfigError> {
    let err = || ConfigError::ImageName(image.to_string());
    let file = Path::new(image)
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(err)?;
    let stem = file.strip_suffix(".pdi").ok_or_else(err)?;
    let rate = stem.strip_suffix('G').ok_or_else(err)?;
    let digits = rate.rsplit('_').next().ok_or_else(err)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    digits.parse().map_err(|_| err())
}
