//! `eyescan analyze` - histogram, peaks and PER of a saved slice dump.

use std::path::Path;

use eyescan_core::{
    ErrorRateEstimate, HistogramAccumulator, PeakReport, PeakSearch, PerSettings, ScanConfig,
    estimate, find_peaks_and_valleys,
};
use serde::Serialize;

use super::fail;

#[derive(Debug, Serialize)]
struct AnalysisOutput {
    samples: usize,
    binned: u64,
    data_rate_gbps: u32,
    histogram: Vec<u64>,
    report: Option<PeakReport>,
    per: Option<ErrorRateEstimate>,
}

pub fn run(path: &str, rate: u32, bins: usize, json: bool) {
    let text = match std::fs::read_to_string(Path::new(path)) {
        Ok(t) => t,
        Err(e) => fail(&format!("cannot read {path}: {e}")),
    };
    let samples = parse_samples(&text).unwrap_or_else(|e| fail(&format!("{path}: {e}")));
    if samples.is_empty() {
        fail(&format!("{path}: no samples"));
    }

    let config = ScanConfig {
        data_rate_gbps: rate,
        hist_bins: bins,
        ..ScanConfig::default()
    };
    if let Err(e) = config.validate() {
        fail(&e.to_string());
    }
    let output = analyze(&samples, &config);

    if json {
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{s}"),
            Err(e) => fail(&format!("serializing report: {e}")),
        }
        return;
    }
    print_report(&output, &config);
}

fn analyze(samples: &[f64], config: &ScanConfig) -> AnalysisOutput {
    let mut hist = HistogramAccumulator::new(config.hist_bins);
    hist.add_samples(samples);
    let report = find_peaks_and_valleys(
        hist.counts(),
        hist.edges(),
        config.data_rate_gbps,
        &PeakSearch::from(config),
    );
    let per = report.as_ref().and_then(|r| {
        estimate(
            samples.iter().copied(),
            &r.peaks,
            config.data_rate_gbps,
            &PerSettings::from(config),
        )
    });
    AnalysisOutput {
        samples: samples.len(),
        binned: hist.total(),
        data_rate_gbps: config.data_rate_gbps,
        histogram: hist.counts().to_vec(),
        report,
        per,
    }
}

fn print_report(out: &AnalysisOutput, config: &ScanConfig) {
    println!("Slice analysis");
    println!("  Samples:     {} ({} in range)", out.samples, out.binned);
    println!("  Rate:        {} Gbps {}", out.data_rate_gbps, config.modulation());
    println!("  Bins:        {}", out.histogram.len());
    println!();

    let Some(report) = &out.report else {
        println!("No levels found.");
        return;
    };
    println!("  {}", report.summary);
    println!("  Eye opening: {:.2}", report.eye_opening);
    match &out.per {
        Some(per) => {
            println!("  PER:         {:.3e}", per.per);
            println!("  {}", per.text);
        }
        None => println!("  PER:         n/a"),
    }
    println!();

    let max = out.histogram.iter().copied().max().unwrap_or(0).max(1);
    let width = config.bin_width();
    for (i, &count) in out.histogram.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let bar = (count * 50 / max) as usize;
        let mark = if report.peaks.contains(&i) {
            " ◆"
        } else if report.valleys.contains(&i) {
            " ◇"
        } else {
            ""
        };
        println!("  {:>6.1} {:>7} {}{mark}", i as f64 * width, count, "█".repeat(bar));
    }
}

/// Amplitudes separated by whitespace or commas. `#` starts a comment.
fn parse_samples(text: &str) -> Result<Vec<f64>, String> {
    let mut samples = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("");
        for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
            if token.is_empty() {
                continue;
            }
            let value: f64 = token
                .parse()
                .map_err(|_| format!("line {}: not a number: {token}", n + 1))?;
            samples.push(value);
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // parse_samples tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_mixed_separators() {
        let samples = parse_samples("20.5 40\n60,80.25\n\n# comment\n 1e1 # tail").unwrap();
        assert_eq!(samples, vec![20.5, 40.0, 60.0, 80.25, 10.0]);
    }

    #[test]
    fn test_parse_reports_line() {
        let err = parse_samples("1 2\n3 x").unwrap_err();
        assert!(err.contains("line 2"), "{err}");
    }

    // -----------------------------------------------------------------------
    // analyze tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_analyze_pam4_dump() {
        let mut samples = Vec::new();
        for i in 0..4000 {
            let level = [20.0, 40.0, 60.0, 80.0][i % 4];
            samples.push(level + ((i / 4) % 5) as f64 * 0.4 - 0.8);
        }
        let config = ScanConfig::default();
        let out = analyze(&samples, &config);
        assert_eq!(out.binned, 4000);
        let report = out.report.unwrap();
        assert_eq!(report.peaks.len(), 4);
        assert!((report.eye_opening - 20.0).abs() <= 2.0);
        assert!(out.per.is_some());
    }

    #[test]
    fn test_analyze_nrz_has_no_per() {
        let samples: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 30.0 } else { 70.0 }).collect();
        let config = ScanConfig {
            data_rate_gbps: 25,
            ..ScanConfig::default()
        };
        let out = analyze(&samples, &config);
        assert_eq!(out.report.unwrap().peaks, vec![30, 70]);
        assert!(out.per.is_none());
    }
}
