//! Error types shared across the acquisition core.

use thiserror::Error;

/// Failures reported by the hardware collaborator (probe or acquisition engine).
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("link {0} is not available on this target")]
    LinkUnavailable(String),

    #[error("acquisition engine {action} failed: {reason}")]
    Engine { action: &'static str, reason: String },

    #[error("hardware call panicked: {0}")]
    Panicked(String),
}

/// A delivered slice that cannot be appended to the ring.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SliceError {
    #[error("slice length {got} does not match slicer size {expected}")]
    Length { expected: usize, got: usize },
}

/// Invalid run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("hist_bins must be an even number of at least 8 (got {0})")]
    HistBins(usize),

    #[error("view_slices ({view}) cannot exceed max_slices ({capacity})")]
    ViewWindow { view: usize, capacity: usize },

    #[error("unknown connection type '{0}' (expected S4, S8, X4, X8, SLoop_x4, SLoop_x8, XConn_x4 or XConn_x8)")]
    ConnectionType(String),

    #[error("cannot derive data rate from image name '{0}' (expected *_<N>G.pdi)")]
    ImageName(String),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error for launching and finishing a scan run.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no links to scan")]
    NoLinks,

    #[error("worker thread for {0} could not be spawned")]
    Spawn(String),
}
