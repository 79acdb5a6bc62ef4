//! Simulated hardware for bench-less runs and tests.
//!
//! Every link gets a probe whose counters grow like a clean PRBS link and an
//! engine that emits synthetic eye-scan slices from a producer thread. All
//! randomness comes from seeded `StdRng`s, so a run is reproducible.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Modulation, NO_LINK, ScanConfig};
use crate::error::HardwareError;
use crate::hardware::{AcquisitionEngine, Hardware, LinkProbe, LinkReading, ScanUpdate, UpdatesCallback};
use crate::link::Link;

pub const DEFAULT_SEED: u64 = 42;

// ---------------------------------------------------------------------------
// Slice generation
// ---------------------------------------------------------------------------

/// Shape of a synthetic slice: level centers plus noise.
#[derive(Debug, Clone, PartialEq)]
pub struct SlicePattern {
    pub levels: Vec<f64>,
    /// Per-slice offset of each level, uniform in `±jitter`.
    pub jitter: f64,
    /// Noise around each level.
    pub sigma: f64,
    /// Offset all levels together instead of one draw per level.
    pub shared_jitter: bool,
}

impl SlicePattern {
    pub fn pam4() -> Self {
        Self {
            levels: vec![20.0, 40.0, 60.0, 80.0],
            jitter: 2.0,
            sigma: 1.5,
            shared_jitter: false,
        }
    }

    pub fn nrz() -> Self {
        Self {
            levels: vec![30.0, 70.0],
            jitter: 2.0,
            sigma: 2.0,
            shared_jitter: false,
        }
    }

    pub fn for_modulation(modulation: Modulation) -> Self {
        match modulation {
            Modulation::Nrz => Self::nrz(),
            Modulation::Pam4 => Self::pam4(),
        }
    }

    /// `len` amplitudes, cycling through the levels sample by sample.
    pub fn generate<R: Rng>(&self, rng: &mut R, len: usize) -> Vec<f64> {
        let shared = self.jitter * 2.0 * (rng.random::<f64>() - 0.5);
        let centers: Vec<f64> = self
            .levels
            .iter()
            .map(|c| {
                if self.shared_jitter {
                    c + shared
                } else {
                    c + self.jitter * 2.0 * (rng.random::<f64>() - 0.5)
                }
            })
            .collect();
        (0..len)
            .map(|s| centers[s % centers.len()] + self.sigma * gaussian(rng))
            .collect()
    }
}

/// Standard normal draw (Box-Muller).
pub fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub seed: u64,
    /// Time between slices from one engine.
    pub scan_period: Duration,
    /// Deliver a truncated slice every N deliveries.
    pub malformed_every: Option<u64>,
    /// Link ids that report `No link`.
    pub down_links: Vec<usize>,
    /// Link ids missing from the target entirely; probing them fails.
    pub absent_links: Vec<usize>,
    pub pattern: Option<SlicePattern>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            scan_period: Duration::from_millis(500),
            malformed_every: None,
            down_links: Vec::new(),
            absent_links: Vec::new(),
            pattern: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

pub struct SimHardware {
    config: Arc<ScanConfig>,
    options: SimOptions,
}

impl SimHardware {
    pub fn new(config: Arc<ScanConfig>, options: SimOptions) -> Self {
        Self { config, options }
    }

    fn pattern(&self) -> SlicePattern {
        self.options
            .pattern
            .clone()
            .unwrap_or_else(|| SlicePattern::for_modulation(self.config.modulation()))
    }
}

impl Hardware for SimHardware {
    fn name(&self) -> &str {
        "simulator"
    }

    fn probe(&self, link: &Link) -> Result<Box<dyn LinkProbe>, HardwareError> {
        if self.options.absent_links.contains(&link.id) {
            return Err(HardwareError::LinkUnavailable(link.name()));
        }
        Ok(Box::new(SimProbe {
            rate_gbps: self.config.data_rate_gbps,
            down: self.options.down_links.contains(&link.id),
            bits: 0,
            errors: 0,
            rng: StdRng::seed_from_u64(self.options.seed ^ link.id as u64),
        }))
    }

    fn create_acquisition(&self, link: &Link) -> Result<Box<dyn AcquisitionEngine>, HardwareError> {
        Ok(Box::new(SimEngine {
            link_name: link.name(),
            pattern: self.pattern(),
            slicer_size: self.config.slicer_size,
            period: self.options.scan_period,
            seed: self.options.seed ^ (link.id as u64).rotate_left(32),
            malformed_every: self.options.malformed_every,
            callback: None,
            deliveries: Arc::new(AtomicU64::new(0)),
            producer: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

pub struct SimProbe {
    rate_gbps: u32,
    down: bool,
    bits: u64,
    errors: u64,
    rng: StdRng,
}

impl LinkProbe for SimProbe {
    fn read(&mut self) -> Result<LinkReading, HardwareError> {
        let bits = 2 * u64::from(self.rate_gbps) * 1_000_000_000;
        self.bits += bits;
        self.errors += if self.down {
            bits / 2
        } else {
            self.rng.random_range(1..=100)
        };
        Ok(LinkReading {
            status: if self.down {
                NO_LINK.to_string()
            } else {
                format!("{} Gbps", self.rate_gbps)
            },
            line_rate: format!("{} Gbps", self.rate_gbps),
            bit_count: self.bits,
            error_count: self.errors,
            ber: self.errors as f64 / self.bits as f64,
        })
    }

    fn reset_tx(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }

    fn reset_rx(&mut self) -> Result<(), HardwareError> {
        self.bits = 0;
        self.errors = 0;
        Ok(())
    }

    fn diagnostics(&mut self) -> Result<String, HardwareError> {
        Ok(format!(
            "LinkStatus='{}'   LineRate={} Gbps   Pattern Checker: LockStatus='{}'  ErrorCount='{}'  CycleCount='{}'",
            if self.down { NO_LINK } else { "linked" },
            self.rate_gbps,
            if self.down { "Not Locked" } else { "Locked" },
            self.errors,
            self.bits / 64
        ))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type SharedCallback = Arc<dyn Fn(ScanUpdate) + Send + Sync>;

pub struct SimEngine {
    link_name: String,
    pattern: SlicePattern,
    slicer_size: usize,
    period: Duration,
    seed: u64,
    malformed_every: Option<u64>,
    callback: Option<SharedCallback>,
    deliveries: Arc<AtomicU64>,
    producer: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl AcquisitionEngine for SimEngine {
    fn start(&mut self) -> Result<(), HardwareError> {
        if self.producer.is_some() {
            return Ok(());
        }
        let callback = self.callback.clone().ok_or_else(|| HardwareError::Engine {
            action: "start",
            reason: "no updates callback registered".to_string(),
        })?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let deliveries = Arc::clone(&self.deliveries);
        let pattern = self.pattern.clone();
        let size = self.slicer_size;
        let period = self.period;
        let malformed_every = self.malformed_every;
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(deliveries.load(Ordering::Relaxed)));

        let handle = thread::Builder::new()
            .name(format!("sim-{}", self.link_name))
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    let n = deliveries.fetch_add(1, Ordering::Relaxed) + 1;
                    let mut slicer = pattern.generate(&mut rng, size);
                    if malformed_every.is_some_and(|every| every > 0 && n % every == 0) {
                        slicer.truncate(size / 2);
                    }
                    let snr = 18.0 + rng.random::<f64>() * 4.0;
                    callback(ScanUpdate { slicer, snr });

                    let deadline = Instant::now() + period;
                    while flag.load(Ordering::Relaxed) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::sleep((deadline - now).min(Duration::from_millis(20)));
                    }
                }
            })
            .map_err(|e| HardwareError::Engine {
                action: "start",
                reason: e.to_string(),
            })?;

        self.producer = Some((running, handle));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        if let Some((running, handle)) = self.producer.take() {
            running.store(false, Ordering::Relaxed);
            handle.join().map_err(|_| HardwareError::Engine {
                action: "stop",
                reason: "producer thread panicked".to_string(),
            })?;
        }
        Ok(())
    }

    fn set_updates_callback(&mut self, callback: UpdatesCallback) {
        self.callback = Some(Arc::from(callback));
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
