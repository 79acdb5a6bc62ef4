pub mod analyze;
pub mod monitor;
pub mod run;
pub mod topology;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use eyescan_core::{
    ConfigError, ConnectionType, FlowControl, Hardware, Link, ScanConfig, SimHardware, SimOptions,
    data_rate_from_image, simulated_links,
};

/// Options shared by every command that drives links.
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// JSON configuration file; flags and EYESCAN_* variables override it
    #[arg(long, env = "EYESCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Board connection type (S4, S8, X4, X8); default: simulated links
    #[arg(long, env = "EYESCAN_CONNECTION")]
    pub connection: Option<String>,

    /// Number of simulated links when no connection type is given
    #[arg(long, default_value = "4", env = "EYESCAN_LINKS")]
    pub links: usize,

    /// Device image name carrying the data rate, e.g. ibert_53G.pdi
    #[arg(long, env = "EYESCAN_IMAGE")]
    pub image: Option<String>,

    /// Data rate in Gbps (overrides --image)
    #[arg(long, env = "EYESCAN_RATE")]
    pub rate: Option<u32>,

    /// Flow control: self (per-link throttle) or global (round robin)
    #[arg(long, env = "EYESCAN_FLOW", value_parser = ["self", "global"])]
    pub flow: Option<String>,

    /// Output directory for CSV logs
    #[arg(long, env = "EYESCAN_CSV_PATH")]
    pub csv_path: Option<PathBuf>,

    /// Test identifier used in the run directory name
    #[arg(long, env = "EYESCAN_TEST_ID")]
    pub test_id: Option<String>,

    /// Board identifier used in CSV file names
    #[arg(long, env = "EYESCAN_HW_ID")]
    pub hw_id: Option<String>,

    /// PRBS pattern name recorded with the run
    #[arg(long, env = "EYESCAN_PATTERN")]
    pub pattern: Option<String>,

    /// Link name (e.g. YK-Quad_202_CH0) whose logging is raised to info
    #[arg(long, env = "EYESCAN_TRACE_LINK")]
    pub trace_link: Option<String>,

    /// State machine tick in milliseconds
    #[arg(long, env = "EYESCAN_TICK_MS")]
    pub tick_ms: Option<u64>,

    /// Start-up stagger per link index in milliseconds
    #[arg(long, env = "EYESCAN_STAGGER_MS")]
    pub stagger_ms: Option<u64>,

    /// Simulator seed
    #[arg(long, default_value = "42", env = "EYESCAN_SEED")]
    pub seed: u64,

    /// Simulator slice period in milliseconds
    #[arg(long, default_value = "500")]
    pub scan_period_ms: u64,

    /// Comma-separated link ids the simulator reports as down
    #[arg(long, value_delimiter = ',')]
    pub down: Vec<usize>,

    /// Comma-separated link ids missing from the simulated target
    #[arg(long, value_delimiter = ',')]
    pub absent: Vec<usize>,

    /// Simulator delivers a truncated slice every N slices
    #[arg(long)]
    pub malformed_every: Option<u64>,
}

impl ScanArgs {
    /// File (or defaults), then flags, then validation.
    pub fn build_config(&self) -> Result<ScanConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::from_file(path)?,
            None => ScanConfig::default(),
        };

        if let Some(image) = &self.image {
            config.data_rate_gbps = data_rate_from_image(image)?;
        }
        if let Some(rate) = self.rate {
            config.data_rate_gbps = rate;
        }
        match self.flow.as_deref() {
            Some("global") if !config.flow_control.is_global() => {
                config.flow_control = FlowControl::global_default();
            }
            Some("self") => config.flow_control = FlowControl::SelfThrottle,
            _ => {}
        }
        if let Some(path) = &self.csv_path {
            config.csv_path.clone_from(path);
        }
        if let Some(id) = &self.test_id {
            config.test_id.clone_from(id);
        }
        if let Some(id) = &self.hw_id {
            config.hw_id.clone_from(id);
        }
        if let Some(pattern) = &self.pattern {
            config.pattern.clone_from(pattern);
        }
        if let Some(name) = &self.trace_link {
            config.trace_link = Some(name.clone());
        }
        if let Some(ms) = self.tick_ms {
            config.tick_ms = ms;
        }
        if let Some(ms) = self.stagger_ms {
            config.stagger_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn links(&self) -> Result<Vec<Link>, ConfigError> {
        match &self.connection {
            Some(name) => Ok(name.parse::<ConnectionType>()?.links()),
            None => Ok(simulated_links(self.links)),
        }
    }

    pub fn hardware(&self, config: &Arc<ScanConfig>) -> Arc<dyn Hardware> {
        Arc::new(SimHardware::new(
            Arc::clone(config),
            SimOptions {
                seed: self.seed,
                scan_period: Duration::from_millis(self.scan_period_ms),
                malformed_every: self.malformed_every,
                down_links: self.down.clone(),
                absent_links: self.absent.clone(),
                pattern: None,
            },
        ))
    }

    /// Config, links and hardware, or exit with the error.
    pub fn prepare(&self) -> (Arc<ScanConfig>, Vec<Link>, Arc<dyn Hardware>) {
        let config = match self.build_config() {
            Ok(c) => Arc::new(c),
            Err(e) => fail(&format!("invalid configuration: {e}")),
        };
        let links = match self.links() {
            Ok(l) => l,
            Err(e) => fail(&e.to_string()),
        };
        let hardware = self.hardware(&config);
        (config, links, hardware)
    }
}

/// Print an error and exit with status 1.
pub fn fail(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

/// Compact BER for tables: `1.2e-12`, or `-` before the first poll.
pub fn format_ber(ber: f64, polls: u64) -> String {
    if polls == 0 {
        "-".to_string()
    } else {
        format!("{ber:.1e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        scan: ScanArgs,
    }

    fn args(extra: &[&str]) -> ScanArgs {
        let mut argv = vec!["eyescan"];
        argv.extend_from_slice(extra);
        Harness::try_parse_from(argv).unwrap().scan
    }

    // -----------------------------------------------------------------------
    // build_config tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_defaults_validate() {
        let config = args(&[]).build_config().unwrap();
        assert_eq!(config.data_rate_gbps, 53);
        assert_eq!(config.flow_control, FlowControl::SelfThrottle);
    }

    #[test]
    fn test_image_then_rate_override() {
        let config = args(&["--image", "ibert_25G.pdi"]).build_config().unwrap();
        assert_eq!(config.data_rate_gbps, 25);
        let config = args(&["--image", "ibert_25G.pdi", "--rate", "106"])
            .build_config()
            .unwrap();
        assert_eq!(config.data_rate_gbps, 106);
    }

    #[test]
    fn test_bad_image_rejected() {
        assert!(args(&["--image", "ibert.bit"]).build_config().is_err());
    }

    #[test]
    fn test_flow_flag() {
        let config = args(&["--flow", "global"]).build_config().unwrap();
        assert!(config.flow_control.is_global());
    }

    #[test]
    fn test_file_then_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("scan.json");
        std::fs::write(&path, r#"{"test_id": "file", "hw_id": "3", "max_slices": 6}"#).unwrap();
        let config = args(&["--config", path.to_str().unwrap(), "--hw-id", "9"])
            .build_config()
            .unwrap();
        assert_eq!(config.test_id, "file");
        assert_eq!(config.hw_id, "9");
        assert_eq!(config.max_slices, 6);
    }

    // -----------------------------------------------------------------------
    // links tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_links_from_connection() {
        assert_eq!(args(&["--connection", "X8"]).links().unwrap().len(), 16);
        assert_eq!(args(&["--links", "3"]).links().unwrap().len(), 3);
        assert!(args(&["--connection", "Z9"]).links().is_err());
    }

    #[test]
    fn test_format_ber() {
        assert_eq!(format_ber(0.0, 0), "-");
        assert_eq!(format_ber(1.5e-12, 1), "1.5e-12");
    }
}
