//! # eyescan-core
//!
//! **Continuous BER and eye-scan acquisition for multi-lane SerDes links.**
//!
//! `eyescan-core` drives one acquisition state machine per transceiver link.
//! It polls bit/error counters, buffers the eye-scan slices an acquisition
//! engine streams in, and keeps a cumulative amplitude histogram. From that
//! histogram it derives PAM4/NRZ level peaks, the eye opening and a
//! Gaussian-model PAM4 symbol error rate.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use eyescan_core::{DashboardBoard, ScanConfig, SimHardware, SimOptions, ViewArena, simulated_links};
//!
//! let config = Arc::new(ScanConfig::default());
//! let hardware = Arc::new(SimHardware::new(Arc::clone(&config), SimOptions::default()));
//! let board = Arc::new(DashboardBoard::default());
//!
//! let arena = ViewArena::launch(config, hardware, board.clone(), simulated_links(4), true)?;
//! std::thread::sleep(Duration::from_secs(30));
//! for snap in board.snapshots() {
//!     println!("{} {} eye={:.1}", snap.name, snap.state, snap.metrics.eye_opening);
//! }
//! let summary = arena.finish()?;
//! println!("{} links, run.json at {:?}", summary.reports.len(), summary.meta_path);
//! # Ok::<(), eyescan_core::ScanError>(())
//! ```
//!
//! ## Architecture
//!
//! Engine callback → mailbox → [`LinkDataSource`] worker → [`ViewSink`]
//!
//! - Each link runs on its own thread. The hardware callback only posts into
//!   the worker's mailbox; appends, polls and analysis happen on the worker.
//! - [`SlicerBuffer`] is a bounded ring of slices with an incremental
//!   histogram. Once padded to capacity it never shrinks.
//! - Flow control is either per-link self-throttling on backlog (with a
//!   watchdog restart) or a global round-robin run by [`ViewArena`].
//! - Front ends never read worker state directly; they receive snapshots
//!   through a [`ViewSink`] such as [`DashboardBoard`].

pub mod analyzer;
pub mod arena;
pub mod config;
pub mod error;
pub mod estimator;
pub mod fsm;
pub mod hardware;
pub mod histogram;
pub mod link;
pub mod metrics;
pub mod session;
pub mod sim;
pub mod sink;
pub mod slicer;
pub mod source;
pub mod stats;

pub use analyzer::{PeakReport, PeakSearch, find_peaks_and_valleys};
pub use arena::{RunSummary, ViewArena};
pub use config::{FlowControl, Modulation, ScanConfig, data_rate_from_image};
pub use error::{ConfigError, HardwareError, ScanError, SliceError};
pub use estimator::{ErrorRateEstimate, LevelStats, PerSettings, estimate};
pub use fsm::{FsmState, RESET_PLAN, ResetStep, StepOutcome};
pub use hardware::{AcquisitionEngine, Hardware, LinkProbe, LinkReading, ScanUpdate, UpdatesCallback};
pub use histogram::HistogramAccumulator;
pub use link::{ConnectionType, Lane, Link, simulated_links};
pub use metrics::{LinkMetrics, LinkSnapshot};
pub use session::{LinkLog, LinkRecord, RunLayout, RunMeta};
pub use sim::{SimHardware, SimOptions, SlicePattern};
pub use sink::{BerSample, DashboardBoard, EyeSample, LinkBoard, NullSink, ViewSink};
pub use slicer::{FillOutcome, Slice, SlicerBuffer};
pub use source::{LinkDataSource, LinkHandle, LinkReport};
pub use stats::{SeriesStats, link_comment};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
