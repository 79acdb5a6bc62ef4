//! Persistent run output: one CSV log per link plus `run.json` metadata.
//!
//! # Storage Format
//!
//! ```text
//! <csv_path>/TID_<test_id>.<YYYY>-<MMDD>/
//!     Sn<hw_id>_<rate>G.<link name>-<HHMM>.csv   one row per poll
//!     run.json                                   run metadata
//! ```
//!
//! Timestamps are UTC.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::link::Link;
use crate::metrics::LinkMetrics;

pub const CSV_HEADER: &str = "Samples,Elapsed Time,Status,Line Rate,Bits Count,Errors Count,BER,SNR,comments,EYE-Opening,Histogram,PER,PER Summary";

pub const RUN_META_FILE: &str = "run.json";

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Paths of one run, fixed at start time.
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_dir: PathBuf,
    started_at: SystemTime,
    hhmm: String,
}

impl RunLayout {
    pub fn new(config: &ScanConfig, started_at: SystemTime) -> Self {
        let t = UtcTime::from_system(started_at);
        let run_dir = config.csv_path.join(format!(
            "TID_{}.{:04}-{:02}{:02}",
            config.test_id, t.year, t.month, t.day
        ));
        Self {
            run_dir,
            started_at,
            hhmm: format!("{:02}{:02}", t.hour, t.minute),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn link_log_path(&self, config: &ScanConfig, link: &Link) -> PathBuf {
        self.run_dir.join(format!(
            "Sn{}_{}G.{}-{}.csv",
            config.hw_id,
            config.data_rate_gbps,
            link.name(),
            self.hhmm
        ))
    }
}

// ---------------------------------------------------------------------------
// Per-link CSV log
// ---------------------------------------------------------------------------

/// Buffered CSV of one link's polls. Rows reach disk at the latest on
/// [`LinkLog::finish`].
pub struct LinkLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl LinkLog {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{CSV_HEADER}")?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, sample: u64, elapsed: Duration, m: &LinkMetrics) -> io::Result<()> {
        let per = m.per.map(|p| format!("{p:.3e}")).unwrap_or_default();
        writeln!(
            self.writer,
            "{},{:.3},{},{},{},{},{:.3e},{:.2},{},{:.2},{},{},{}",
            sample,
            elapsed.as_secs_f64(),
            csv_field(&m.status),
            csv_field(&m.line_rate),
            m.bit_count,
            m.error_count,
            m.ber,
            m.snr,
            csv_field(&m.comment),
            m.eye_opening,
            csv_field(&m.hist_summary),
            per,
            csv_field(&m.per_summary)
        )?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close. Returns the log path.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

/// Quote a field when it holds a separator, quote or line break.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// Run metadata (run.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInfo {
    pub os: String,
    pub arch: String,
    pub host: String,
    pub cores: usize,
}

impl MachineInfo {
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            host: std::env::var("HOSTNAME")
                .or_else(|_| fs::read_to_string("/etc/hostname").map(|h| h.trim().to_string()))
                .unwrap_or_else(|_| "unknown".to_string()),
            cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Final state of one link, as recorded in `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: usize,
    pub name: String,
    pub tx: String,
    pub rx: String,
    pub polls: u64,
    pub scans: u64,
    pub status: String,
    pub ber: f64,
    pub eye_opening: f64,
    pub per: Option<f64>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub version: u32,
    pub id: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub hardware: String,
    pub config: ScanConfig,
    pub links: Vec<LinkRecord>,
    pub machine: MachineInfo,
    pub eyescan_version: String,
}

impl RunMeta {
    pub fn new(
        layout: &RunLayout,
        ended_at: SystemTime,
        hardware: &str,
        config: &ScanConfig,
        links: Vec<LinkRecord>,
    ) -> Self {
        let duration = ended_at
            .duration_since(layout.started_at())
            .unwrap_or_default();
        Self {
            version: 1,
            id: uuid::Uuid::new_v4().to_string(),
            started_at: UtcTime::from_system(layout.started_at()).iso8601(),
            ended_at: UtcTime::from_system(ended_at).iso8601(),
            duration_ms: duration.as_millis() as u64,
            hardware: hardware.to_string(),
            config: config.clone(),
            links,
            machine: MachineInfo::detect(),
            eyescan_version: crate::VERSION.to_string(),
        }
    }

    /// Write `run.json` into `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        let path = dir.join(RUN_META_FILE);
        fs::write(&path, json)?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Time formatting
// ---------------------------------------------------------------------------

/// Broken-down UTC time, no leap seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UtcTime {
    year: i64,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl UtcTime {
    fn from_system(t: SystemTime) -> Self {
        Self::from_unix(t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
    }

    fn from_unix(secs: u64) -> Self {
        let rem = secs % 86_400;
        // Days-to-civil conversion on a March-based 400-year era.
        let z = (secs / 86_400) as i64 + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
        let year = yoe + era * 400 + i64::from(month <= 2);
        Self {
            year,
            month,
            day,
            hour: (rem / 3600) as u32,
            minute: (rem / 60 % 60) as u32,
            second: (rem % 60) as u32,
        }
    }

    fn iso8601(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}
