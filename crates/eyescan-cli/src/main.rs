//! CLI for eyescan - live BER and eye-scan monitoring of SerDes links.

mod commands;
mod tui;

use std::fs::File;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use commands::ScanArgs;

#[derive(Parser)]
#[command(name = "eyescan")]
#[command(about = "eyescan - live BER and eye-scan monitoring of SerDes links")]
#[command(version = eyescan_core::VERSION)]
struct Cli {
    /// Debug level: 0 errors only, 1 warnings, 2 info, 3 debug, 4-5 trace. RUST_LOG overrides.
    #[arg(
        long,
        global = true,
        env = "EYESCAN_DBG_LEVEL",
        default_value = "2",
        value_parser = clap::value_parser!(u8).range(0..=5)
    )]
    dbg_level: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Headless acquisition on every link, with a periodic summary table.
    /// Writes one CSV per link plus run.json.
    Run {
        #[command(flatten)]
        scan: ScanArgs,

        /// Stop after this long (e.g. "30s", "5m", "1h"); default: until Ctrl+C
        #[arg(long, env = "EYESCAN_DURATION")]
        duration: Option<String>,

        /// Summary table interval
        #[arg(long, default_value = "5s")]
        report_every: String,

        /// Do not write CSV logs or run.json
        #[arg(long)]
        no_record: bool,
    },

    /// Live dashboard (TUI): link table, histogram and BER/SNR trends
    Monitor {
        #[command(flatten)]
        scan: ScanArgs,

        /// Redraw rate in seconds
        #[arg(long, default_value = "0.5")]
        refresh: f64,

        /// Log file while the dashboard owns the terminal
        #[arg(long, default_value = "eyescan-monitor.log")]
        log_file: String,

        /// Also write CSV logs and run.json
        #[arg(long)]
        record: bool,
    },

    /// Offline analysis of a slice dump (whitespace or comma separated amplitudes)
    Analyze {
        /// Path to the sample file
        path: String,

        /// Data rate in Gbps; selects NRZ or PAM4
        #[arg(long, default_value = "53")]
        rate: u32,

        /// Histogram bin count
        #[arg(long, default_value = "100")]
        bins: usize,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the links of a board connection type
    Topology {
        /// S4|SLoop_x4, S8|SLoop_x8, X4|XConn_x4, X8|XConn_x8
        #[arg(default_value = "S4")]
        connection: String,
    },
}

fn level_filter(dbg_level: u8) -> LevelFilter {
    match dbg_level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(dbg_level: u8, log_file: Option<&str>) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level_filter(dbg_level)).parse_default_env();
    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Warning: cannot open log file {path}: {e}; logging errors only");
                builder.filter_level(LevelFilter::Error);
            }
        }
    }
    builder.init();
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scan,
            duration,
            report_every,
            no_record,
        } => {
            init_logging(cli.dbg_level, None);
            commands::run::run(&scan, duration.as_deref(), &report_every, !no_record);
        }
        Commands::Monitor {
            scan,
            refresh,
            log_file,
            record,
        } => {
            init_logging(cli.dbg_level, Some(&log_file));
            commands::monitor::run(&scan, refresh, record);
        }
        Commands::Analyze {
            path,
            rate,
            bins,
            json,
        } => {
            init_logging(cli.dbg_level, None);
            commands::analyze::run(&path, rate, bins, json);
        }
        Commands::Topology { connection } => {
            init_logging(cli.dbg_level, None);
            commands::topology::run(&connection);
        }
    }
}
