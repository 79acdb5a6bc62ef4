//! `eyescan run` - headless acquisition with a periodic summary table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use eyescan_core::{DashboardBoard, LinkSnapshot, ViewArena};

use super::{ScanArgs, fail, format_ber};

/// Run the acquisition until `duration` passes or Ctrl+C.
pub fn run(scan: &ScanArgs, duration: Option<&str>, report_every: &str, record: bool) {
    let max_duration = duration.map(|d| parse_duration(d).unwrap_or_else(|e| fail(&e)));
    let report_every = parse_duration(report_every).unwrap_or_else(|e| fail(&e));

    let (config, links, hardware) = scan.prepare();
    let board = Arc::new(DashboardBoard::default());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        fail(&format!("cannot install Ctrl+C handler: {e}"));
    }

    let link_count = links.len();
    let arena = match ViewArena::launch(Arc::clone(&config), hardware, board.clone(), links, record) {
        Ok(a) => a,
        Err(e) => fail(&e.to_string()),
    };

    println!("eyescan run");
    println!("  Links:     {link_count} ({} started)", arena.len());
    println!("  Rate:      {} Gbps {}", config.data_rate_gbps, config.modulation());
    println!("  Flow:      {}", config.flow_control);
    println!("  Pattern:   {}", config.pattern);
    match max_duration {
        Some(d) => println!("  Duration:  {}s", d.as_secs()),
        None => println!("  Duration:  until Ctrl+C"),
    }
    match arena.run_dir() {
        Some(dir) => println!("  Output:    {}", dir.display()),
        None => println!("  Output:    not recorded"),
    }
    println!();

    let start = Instant::now();
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        if max_duration.is_some_and(|max| start.elapsed() >= max) {
            break;
        }
        if !arena.is_running() {
            eprintln!("All link workers have exited.");
            break;
        }
        if last_report.elapsed() >= report_every {
            print_table(&board.snapshots(), start.elapsed());
            last_report = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    println!("Stopping...");
    let summary = match arena.finish() {
        Ok(s) => s,
        Err(e) => fail(&format!("finalizing run: {e}")),
    };
    let finals: Vec<LinkSnapshot> = summary.reports.iter().map(|r| r.snapshot.clone()).collect();
    print_table(&finals, summary.duration);

    let malformed: u64 = summary.reports.iter().map(|r| r.malformed).sum();
    if malformed > 0 {
        println!("Dropped {malformed} malformed slices.");
    }
    if let Some(path) = &summary.meta_path {
        println!("Run saved to {}", path.parent().unwrap_or(path).display());
        println!("  run.json   - metadata");
        println!("  Sn*.csv    - one row per poll for each link");
    }
}

fn print_table(snapshots: &[LinkSnapshot], elapsed: Duration) {
    println!("── {:.0}s ──", elapsed.as_secs_f64());
    println!(
        "{:<20} {:>5} {:<10} {:>9} {:>6} {:>6} {:>9} {:>6}",
        "Link", "State", "Status", "BER", "SNR", "Eye", "PER", "Scans"
    );
    for s in snapshots {
        let m = &s.metrics;
        let per = m.per.map_or_else(|| "-".to_string(), |p| format!("{p:.1e}"));
        println!(
            "{:<20} {:>5} {:<10} {:>9} {:>6.1} {:>6.1} {:>9} {:>6}",
            s.name,
            s.state.code(),
            truncate(&m.status, 10),
            format_ber(m.ber, s.polls),
            m.snr,
            m.eye_opening,
            per,
            s.scans
        );
    }
    println!();
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Parse a duration string like "5m", "30s", "1h", "100ms".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        // Assume seconds
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    Ok(Duration::from_millis(value.saturating_mul(multiplier)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // parse_duration tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_bare_number_is_seconds() {
        assert_eq!(parse_duration(" 12 ").unwrap(), Duration::from_secs(12));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("53 Gbps", 10), "53 Gbps");
        assert_eq!(truncate("LinkStatus='No link'", 10), "LinkStatus");
    }
}
