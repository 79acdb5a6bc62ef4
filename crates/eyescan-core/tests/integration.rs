//! Integration tests for eyescan-core.
//!
//! These tests exercise the full acquisition pipeline:
//! synthetic slices → slicer ring → histogram → peaks → PER,
//! and simulated multi-link runs through the arena.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eyescan_core::{
    DashboardBoard, FlowControl, FsmState, LinkSnapshot, PeakSearch, PerSettings, ScanConfig,
    SimHardware, SimOptions, Slice, SlicePattern, SlicerBuffer, ViewArena, estimate,
    find_peaks_and_valleys, simulated_links,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn assert_near(actual: &[usize], expected: &[usize], tol: usize) {
    assert_eq!(actual.len(), expected.len(), "peaks {actual:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.abs_diff(*e) <= tol, "peaks {actual:?}, expected near {expected:?}");
    }
}

fn fast_config() -> ScanConfig {
    ScanConfig {
        slicer_size: 400,
        tick_ms: 5,
        stagger_ms: 0,
        ..Default::default()
    }
}

fn sim_options() -> SimOptions {
    SimOptions {
        scan_period: Duration::from_millis(2),
        ..Default::default()
    }
}

/// Poll the board until `done` holds for every link or the deadline passes.
fn wait_for(board: &DashboardBoard, links: usize, done: impl Fn(&LinkSnapshot) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let snaps = board.snapshots();
        if snaps.len() == links && snaps.iter().all(&done) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

// ---------------------------------------------------------------------------
// Analysis pipeline
// ---------------------------------------------------------------------------

#[test]
fn pam4_slices_yield_four_levels_and_clean_per() {
    let config = ScanConfig::default();
    let mut rng = StdRng::seed_from_u64(7);
    let pattern = SlicePattern::pam4();
    let mut buffer = SlicerBuffer::new(config.max_slices, config.slicer_size, config.hist_bins);
    for _ in 0..config.max_slices {
        buffer
            .append(Slice::from(pattern.generate(&mut rng, config.slicer_size)))
            .unwrap();
    }
    assert_eq!(buffer.accumulate_histogram(), config.max_slices);

    let hist = buffer.histogram();
    assert_eq!(hist.total(), (config.max_slices * config.slicer_size) as u64);
    let report = find_peaks_and_valleys(
        hist.counts(),
        hist.edges(),
        config.data_rate_gbps,
        &PeakSearch::from(&config),
    )
    .unwrap();
    assert_near(&report.peaks, &[20, 40, 60, 80], 3);
    assert_eq!(report.valleys.len(), 3);
    assert!((report.eye_opening - 20.0).abs() <= 3.0, "eye {}", report.eye_opening);

    let per = estimate(
        buffer.samples(),
        &report.peaks,
        config.data_rate_gbps,
        &PerSettings::from(&config),
    )
    .unwrap();
    assert!(per.per < 1e-3, "PER {}", per.per);
    assert!(per.levels.iter().all(|l| l.count > 0));
}

#[test]
fn nrz_slices_yield_two_levels_and_no_per() {
    let config = ScanConfig {
        data_rate_gbps: 25,
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(11);
    let pattern = SlicePattern::nrz();
    let mut buffer = SlicerBuffer::new(config.max_slices, config.slicer_size, config.hist_bins);
    buffer
        .append(Slice::from(pattern.generate(&mut rng, config.slicer_size)))
        .unwrap();
    buffer.fill_to_capacity();
    buffer.accumulate_histogram();

    let hist = buffer.histogram();
    let report =
        find_peaks_and_valleys(hist.counts(), hist.edges(), 25, &PeakSearch::from(&config)).unwrap();
    assert_near(&report.peaks, &[30, 70], 3);
    assert!((report.eye_opening - 40.0).abs() <= 4.0);
    assert!(estimate(buffer.samples(), &report.peaks, 25, &PerSettings::from(&config)).is_none());
}

// ---------------------------------------------------------------------------
// Simulated runs
// ---------------------------------------------------------------------------

#[test]
fn self_throttled_run_reaches_running_on_every_link() {
    let config = Arc::new(fast_config());
    let hardware = Arc::new(SimHardware::new(Arc::clone(&config), sim_options()));
    let board = Arc::new(DashboardBoard::default());
    let arena = ViewArena::launch(config, hardware, board.clone(), simulated_links(3), false).unwrap();

    let reached = wait_for(&board, 3, |s| s.state == FsmState::Running && s.peaks.is_some());
    let summary = arena.finish().unwrap();
    assert!(reached, "not every link reached RUNNING");
    assert_eq!(summary.reports.len(), 3);
    for report in &summary.reports {
        assert_eq!(report.snapshot.state, FsmState::Stopped);
        assert!(!report.snapshot.engine_running);
        let peaks = report.snapshot.peaks.as_ref().unwrap();
        assert_near(&peaks.peaks, &[20, 40, 60, 80], 3);
    }
    assert!(summary.meta_path.is_none());
}

#[test]
fn global_flow_control_rotates_acquisition() {
    let config = Arc::new(ScanConfig {
        flow_control: FlowControl::Global {
            dwell_ms: 20,
            rotation_pause_ms: 10,
        },
        ..fast_config()
    });
    let hardware = Arc::new(SimHardware::new(Arc::clone(&config), sim_options()));
    let board = Arc::new(DashboardBoard::default());
    let arena = ViewArena::launch(config, hardware, board.clone(), simulated_links(3), false).unwrap();

    let reached = wait_for(&board, 3, |s| s.state == FsmState::Running && s.scans > 0);
    let summary = arena.finish().unwrap();
    assert!(reached, "global rotation did not feed every link");
    for report in &summary.reports {
        assert!(report.snapshot.scans > 0);
    }
}

#[test]
fn malformed_slices_are_dropped_and_engine_restarted() {
    let config = Arc::new(fast_config());
    let hardware = Arc::new(SimHardware::new(
        Arc::clone(&config),
        SimOptions {
            malformed_every: Some(3),
            ..sim_options()
        },
    ));
    let board = Arc::new(DashboardBoard::default());
    let arena = ViewArena::launch(config, hardware, board.clone(), simulated_links(1), false).unwrap();

    let reached = wait_for(&board, 1, |s| s.state == FsmState::Running && s.scans >= 6);
    let summary = arena.finish().unwrap();
    assert!(reached);
    let report = &summary.reports[0];
    assert!(report.malformed > 0);
    assert!(report.engine_restarts > 0);
    assert!(report.snapshot.peaks.is_some());
}

#[test]
fn down_link_reports_no_link_without_stopping_others() {
    let config = Arc::new(fast_config());
    let hardware = Arc::new(SimHardware::new(
        Arc::clone(&config),
        SimOptions {
            down_links: vec![1],
            ..sim_options()
        },
    ));
    let board = Arc::new(DashboardBoard::default());
    let arena = ViewArena::launch(config, hardware, board.clone(), simulated_links(2), false).unwrap();

    let reached = wait_for(&board, 2, |s| s.state == FsmState::Running);
    let summary = arena.finish().unwrap();
    assert!(reached);

    let down = &summary.reports[1].snapshot.metrics;
    assert_eq!(down.status, "No link");
    assert!(down.comment.starts_with("LinkStatus='No link'"), "{}", down.comment);
    let up = &summary.reports[0].snapshot.metrics;
    assert_eq!(up.status, "53 Gbps");
    assert!(up.comment.starts_with("BER:"));
}

#[test]
fn recorded_run_writes_csv_per_link() {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(ScanConfig {
        csv_path: tmp.path().to_path_buf(),
        test_id: "bench".into(),
        hw_id: "7".into(),
        ..fast_config()
    });
    let hardware = Arc::new(SimHardware::new(Arc::clone(&config), sim_options()));
    let board = Arc::new(DashboardBoard::default());
    let arena = ViewArena::launch(config, hardware, board.clone(), simulated_links(2), true).unwrap();
    wait_for(&board, 2, |s| s.polls >= 3);
    let summary = arena.finish().unwrap();

    for report in &summary.reports {
        let path = report.log_file.as_ref().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Sn7_53G."), "{name}");
        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("Samples,Elapsed Time,Status"));
        assert_eq!(lines.count() as u64, report.snapshot.polls);
    }
    let meta_path = summary.meta_path.unwrap();
    assert!(meta_path.parent().unwrap().file_name().unwrap().to_string_lossy().starts_with("TID_bench."));
}
