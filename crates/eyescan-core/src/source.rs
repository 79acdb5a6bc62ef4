//! Per-link data source: state machine, mailbox and acquisition control.
//!
//! Each [`LinkDataSource`] runs on its own worker thread. The hardware
//! callback never touches link state; it posts [`SourceEvent::Scan`] into the
//! worker's mailbox. The worker drains the mailbox at the start of every step
//! and while it idles between steps, so slice appends, polls and analysis all
//! happen on one thread in a well-defined order.
//!
//! ```text
//! RESET_0 reset link ─► RESET_1 stagger ─► RESET_2 start engine
//!   ─► RESET_3..7 warmup ─► RESET_8 await first slice (holds)
//!   ─► RESET_9 fill buffer ─► RUNNING (loops) ─► STOPPED
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::Level;

use crate::analyzer::{PeakReport, PeakSearch, find_peaks_and_valleys};
use crate::config::{FlowControl, ScanConfig};
use crate::error::{HardwareError, ScanError};
use crate::estimator::{PerSettings, estimate};
use crate::fsm::{FsmState, ResetStep, StepOutcome};
use crate::hardware::{AcquisitionEngine, Hardware, LinkProbe, ScanUpdate};
use crate::link::Link;
use crate::metrics::{LinkMetrics, LinkSnapshot};
use crate::session::{LinkLog, LinkRecord};
use crate::sink::{BerSample, EyeSample, ViewSink};
use crate::slicer::{FillOutcome, Slice, SlicerBuffer};
use crate::stats::{SeriesStats, link_comment, needs_diagnostics};

/// Messages delivered to a link worker.
#[derive(Debug)]
pub enum SourceEvent {
    /// Slice data from the acquisition callback.
    Scan(ScanUpdate),
    /// Global flow control opens this link's window.
    Enable,
    /// Global flow control closes this link's window.
    Disable,
    /// Interrupt an idle wait (used on stop).
    Wake,
}

// ---------------------------------------------------------------------------
// Engine control
// ---------------------------------------------------------------------------

/// Why an engine start or stop was requested. Logged with every action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineReason {
    ResetStart,
    AwaitRetry,
    Throttle,
    Watchdog,
    Stalled,
    MalformedSlice,
    FlowEnable,
    FlowDisable,
    Shutdown,
}

impl fmt::Display for EngineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineReason::ResetStart => "reset-start",
            EngineReason::AwaitRetry => "await-retry",
            EngineReason::Throttle => "throttle",
            EngineReason::Watchdog => "watchdog",
            EngineReason::Stalled => "stalled",
            EngineReason::MalformedSlice => "malformed-slice",
            EngineReason::FlowEnable => "flow-enable",
            EngineReason::FlowDisable => "flow-disable",
            EngineReason::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// Idempotent start/stop around an engine. Failures and panics from the
/// hardware layer are logged and leave the recorded state unchanged.
struct EngineControl {
    engine: Box<dyn AcquisitionEngine>,
    started: bool,
    name: String,
    restarts: u64,
}

impl EngineControl {
    fn new(engine: Box<dyn AcquisitionEngine>, name: String) -> Self {
        Self {
            engine,
            started: false,
            name,
            restarts: 0,
        }
    }

    /// Returns true when the engine changed state.
    fn manage(&mut self, start: bool, reason: EngineReason) -> bool {
        if start == self.started {
            return false;
        }
        let action = if start { "start" } else { "stop" };
        let engine = &mut self.engine;
        let result = catch_unwind(AssertUnwindSafe(|| {
            if start { engine.start() } else { engine.stop() }
        }))
        .unwrap_or_else(|panic| {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HardwareError::Panicked(msg))
        });

        match result {
            Ok(()) => {
                self.started = start;
                if start && reason != EngineReason::ResetStart {
                    self.restarts += 1;
                }
                log::debug!("{}: engine {action} ({reason})", self.name);
                true
            }
            Err(e) => {
                log::warn!("{}: engine {action} failed ({reason}): {e}", self.name);
                false
            }
        }
    }

    /// Stop then start, for engines that may have stalled silently.
    fn force_restart(&mut self, reason: EngineReason) {
        self.manage(false, reason);
        self.manage(true, reason);
    }
}

// ---------------------------------------------------------------------------
// LinkDataSource
// ---------------------------------------------------------------------------

/// Final state of a link worker.
#[derive(Debug, Clone)]
pub struct LinkReport {
    pub link: Link,
    pub snapshot: LinkSnapshot,
    pub log_file: Option<PathBuf>,
    /// Slices discarded for a bad length.
    pub malformed: u64,
    /// Engine starts beyond the initial one.
    pub engine_restarts: u64,
}

impl LinkReport {
    pub fn record(&self) -> LinkRecord {
        let m = &self.snapshot.metrics;
        LinkRecord {
            id: self.link.id,
            name: self.link.name(),
            tx: self.link.tx.clone(),
            rx: self.link.rx.clone(),
            polls: self.snapshot.polls,
            scans: self.snapshot.scans,
            status: m.status.clone(),
            ber: m.ber,
            eye_opening: m.eye_opening,
            per: m.per,
            log_file: self.log_file.clone(),
        }
    }
}

/// Acquisition state of one link. Owned by its worker thread.
pub struct LinkDataSource {
    link: Link,
    name: String,
    config: Arc<ScanConfig>,
    peak_search: PeakSearch,
    per_settings: PerSettings,
    probe: Box<dyn LinkProbe>,
    engine: EngineControl,
    buffer: SlicerBuffer,
    metrics: LinkMetrics,
    ber_stats: SeriesStats,
    snr_stats: SeriesStats,
    peaks: Option<PeakReport>,
    state: FsmState,
    polls: u64,
    malformed: u64,
    started: Instant,
    mailbox: Receiver<SourceEvent>,
    sender: Sender<SourceEvent>,
    running: Arc<AtomicBool>,
    next_watchdog: Instant,
    received_at_watchdog: u64,
    /// Whether flow control lets this link acquire. Always open when self-throttled.
    flow_open: bool,
    was_linked: bool,
    sink: Arc<dyn ViewSink>,
    log: Option<LinkLog>,
    detail: Level,
}

impl LinkDataSource {
    /// Create the probe and engine for `link` and wire the engine callback
    /// into this source's mailbox.
    pub fn new(
        link: Link,
        config: Arc<ScanConfig>,
        hardware: &dyn Hardware,
        sink: Arc<dyn ViewSink>,
        log: Option<LinkLog>,
    ) -> Result<Self, ScanError> {
        let name = link.name();
        let probe = hardware.probe(&link)?;
        let mut engine = hardware.create_acquisition(&link)?;

        let (sender, mailbox) = channel::unbounded();
        let callback_tx = sender.clone();
        engine.set_updates_callback(Box::new(move |update| {
            // The worker may already be gone during shutdown.
            let _ = callback_tx.send(SourceEvent::Scan(update));
        }));

        let detail = if config.is_traced(&name) {
            Level::Info
        } else {
            Level::Debug
        };
        let flow_open = !config.flow_control.is_global();
        let now = Instant::now();

        Ok(Self {
            peak_search: PeakSearch::from(config.as_ref()),
            per_settings: PerSettings::from(config.as_ref()),
            buffer: SlicerBuffer::new(config.max_slices, config.slicer_size, config.hist_bins),
            next_watchdog: now + config.watchdog_interval(),
            engine: EngineControl::new(engine, name.clone()),
            link,
            name,
            config,
            probe,
            metrics: LinkMetrics::default(),
            ber_stats: SeriesStats::new(),
            snr_stats: SeriesStats::new(),
            peaks: None,
            state: FsmState::initial(),
            polls: 0,
            malformed: 0,
            started: now,
            mailbox,
            sender,
            running: Arc::new(AtomicBool::new(true)),
            received_at_watchdog: 0,
            flow_open,
            was_linked: true,
            sink,
            log,
            detail,
        })
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn buffer(&self) -> &SlicerBuffer {
        &self.buffer
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    pub fn engine_running(&self) -> bool {
        self.engine.started
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            link_id: self.link.id,
            name: self.name.clone(),
            state: self.state,
            engine_running: self.engine.started,
            metrics: self.metrics.clone(),
            scans: self.buffer.received(),
            polls: self.polls,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            peaks: self.peaks.clone(),
        }
    }

    /// Move onto a worker thread.
    pub fn spawn(self) -> Result<LinkHandle, ScanError> {
        let link = self.link.clone();
        let sender = self.sender.clone();
        let running = Arc::clone(&self.running);
        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || self.run())
            .map_err(|_| ScanError::Spawn(link.name()))?;
        Ok(LinkHandle {
            link,
            sender,
            running,
            thread,
        })
    }

    /// Worker loop: step, idle for one tick, until stopped.
    pub fn run(mut self) -> LinkReport {
        log::info!("{}: worker started ({})", self.name, self.link);
        let tick = self.config.tick_interval();
        while self.running.load(Ordering::Relaxed) && self.state != FsmState::Stopped {
            self.step();
            self.idle(tick);
        }
        self.finish_object()
    }

    /// One state machine iteration.
    pub fn step(&mut self) {
        self.drain_mailbox();
        let outcome = match self.state {
            FsmState::Reset(_) => match self.state.reset_step() {
                Some(step) => self.run_reset_step(step),
                None => StepOutcome::Advance,
            },
            FsmState::Running => {
                self.poll_counters();
                self.refresh_eye();
                StepOutcome::Hold
            }
            FsmState::Stopped => StepOutcome::Stop,
        };
        let next = self.state.next(outcome);
        if next != self.state {
            log::log!(self.detail, "{}: {} -> {}", self.name, self.state, next);
            self.state = next;
        }
        self.check_watchdog();
        self.sink.redraw(&self.snapshot());
    }

    fn run_reset_step(&mut self, step: ResetStep) -> StepOutcome {
        match step {
            ResetStep::ResetLink => {
                if let Err(e) = self.probe.reset_tx() {
                    log::warn!("{}: TX reset failed: {e}", self.name);
                }
                if let Err(e) = self.probe.reset_rx() {
                    log::warn!("{}: RX reset failed: {e}", self.name);
                }
                StepOutcome::Advance
            }
            ResetStep::Stagger => {
                let delay = self.config.stagger_for(self.link.id);
                log::log!(self.detail, "{}: staggering start by {delay:?}", self.name);
                self.idle(delay);
                StepOutcome::Advance
            }
            ResetStep::StartEngine => {
                if self.flow_open {
                    self.engine.manage(true, EngineReason::ResetStart);
                }
                StepOutcome::Advance
            }
            ResetStep::Warmup => {
                self.poll_counters();
                if !self.buffer.is_empty() {
                    self.buffer.fill_to_capacity();
                    self.refresh_eye();
                }
                StepOutcome::Advance
            }
            ResetStep::AwaitFirstSlice => {
                self.poll_counters();
                if !self.buffer.is_empty() {
                    return StepOutcome::Advance;
                }
                if !self.engine.started && self.flow_open {
                    self.engine.manage(true, EngineReason::AwaitRetry);
                }
                log::log!(self.detail, "{}: waiting for first slice", self.name);
                StepOutcome::Hold
            }
            ResetStep::FillBuffer => match self.buffer.fill_to_capacity() {
                FillOutcome::Waiting => StepOutcome::Hold,
                FillOutcome::Filled { padded } => {
                    log::log!(self.detail, "{}: padded ring with {padded} slices", self.name);
                    self.refresh_eye();
                    StepOutcome::Advance
                }
                FillOutcome::AlreadyFilled => {
                    self.refresh_eye();
                    StepOutcome::Advance
                }
            },
        }
    }

    // -----------------------------------------------------------------------
    // Mailbox
    // -----------------------------------------------------------------------

    /// Handle what is queued now; later arrivals wait for the next drain.
    fn drain_mailbox(&mut self) {
        for _ in 0..self.mailbox.len() {
            match self.mailbox.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
    }

    /// Sleep for `duration` while still serving the mailbox and stop requests.
    fn idle(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            match self.mailbox.recv_timeout(deadline - now) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => return,
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(deadline - now);
                    return;
                }
            }
            self.check_watchdog();
        }
    }

    fn handle_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Scan(update) => self.on_scan(update),
            SourceEvent::Enable => {
                self.flow_open = true;
                // Before the start-engine step the gate only opens; that step starts it.
                if self.state.engine_armed() {
                    self.engine.manage(true, EngineReason::FlowEnable);
                }
            }
            SourceEvent::Disable => {
                self.flow_open = false;
                self.engine.manage(false, EngineReason::FlowDisable);
            }
            SourceEvent::Wake => {}
        }
    }

    fn on_scan(&mut self, update: ScanUpdate) {
        let len = update.slicer.len();
        match self.buffer.append(Slice::from(update.slicer)) {
            Ok(backlog) => {
                self.metrics.snr = update.snr;
                self.snr_stats.push(update.snr);
                log::trace!("{}: slice #{} backlog {backlog}", self.name, self.buffer.received());
                if self.config.flow_control == FlowControl::SelfThrottle
                    && backlog > self.config.throttle_threshold
                    && self.engine.manage(false, EngineReason::Throttle)
                {
                    log::log!(self.detail, "{}: throttled at backlog {backlog}", self.name);
                }
            }
            Err(e) => {
                self.malformed += 1;
                log::error!("{}: dropped slice of length {len}: {e}", self.name);
                if self.config.flow_control == FlowControl::SelfThrottle {
                    self.engine.force_restart(EngineReason::MalformedSlice);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Watchdog
    // -----------------------------------------------------------------------

    /// Restart a self-throttled engine each period, and force a restart
    /// when a running engine delivered nothing during the last period.
    fn check_watchdog(&mut self) {
        let now = Instant::now();
        if now < self.next_watchdog {
            return;
        }
        self.next_watchdog = now + self.config.watchdog_interval();
        let received = self.buffer.received();
        let stalled = received == self.received_at_watchdog;
        self.received_at_watchdog = received;

        if self.config.flow_control.is_global() || !self.state.is_running() {
            return;
        }
        if !self.engine.started {
            self.engine.manage(true, EngineReason::Watchdog);
        } else if stalled {
            log::warn!("{}: no slices for {:?}; restarting engine", self.name, self.config.watchdog_interval());
            self.engine.force_restart(EngineReason::Stalled);
        }
    }

    // -----------------------------------------------------------------------
    // Polling and analysis
    // -----------------------------------------------------------------------

    /// Synchronous counter read: metrics, comment, sink sample, log row.
    fn poll_counters(&mut self) {
        let reading = match self.probe.read() {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{}: counter read failed: {e}", self.name);
                return;
            }
        };
        self.polls += 1;
        self.metrics.apply_reading(&reading);
        self.ber_stats.push(reading.ber);

        let linked = reading.is_linked();
        if linked != self.was_linked {
            if linked {
                log::info!("{}: link up ({})", self.name, reading.status);
            } else {
                log::warn!("{}: link down", self.name);
            }
            self.was_linked = linked;
        }

        let diagnostics = if needs_diagnostics(&reading) {
            self.probe
                .diagnostics()
                .map_err(|e| log::debug!("{}: diagnostics unavailable: {e}", self.name))
                .ok()
        } else {
            None
        };
        self.metrics.comment = link_comment(
            &reading,
            &self.ber_stats,
            &self.snr_stats,
            diagnostics.as_deref(),
        );

        let elapsed = self.started.elapsed();
        self.sink.ber_sample(
            &self.link,
            &BerSample {
                poll: self.polls,
                elapsed_secs: elapsed.as_secs_f64(),
                status: reading.status.clone(),
                ber: reading.ber,
                snr: self.metrics.snr,
                bit_count: reading.bit_count,
                error_count: reading.error_count,
            },
        );

        let written = match self.log.as_mut() {
            Some(log) => log.append(self.polls, elapsed, &self.metrics),
            None => Ok(()),
        };
        if let Err(e) = written {
            log::error!("{}: CSV write failed, logging disabled: {e}", self.name);
            self.log = None;
        }
    }

    /// Bin new slices, re-analyze if anything arrived, hand a view to the sink.
    fn refresh_eye(&mut self) {
        let fresh = self.buffer.accumulate_histogram();
        if fresh > 0 {
            self.analyze();
        }
        let view = self.buffer.view_window(self.config.view_slices);
        let hist = self.buffer.histogram();
        self.sink.eye_sample(
            &self.link,
            &EyeSample {
                view,
                histogram: hist.counts().to_vec(),
                edges: hist.edges().to_vec(),
                report: if fresh > 0 { self.peaks.clone() } else { None },
                snr: self.metrics.snr,
            },
        );
    }

    fn analyze(&mut self) {
        let rate = self.config.data_rate_gbps;
        let hist = self.buffer.histogram();
        let Some(report) = find_peaks_and_valleys(hist.counts(), hist.edges(), rate, &self.peak_search)
        else {
            return;
        };
        let per = estimate(self.buffer.samples(), &report.peaks, rate, &self.per_settings);
        self.metrics.apply_peaks(&report);
        self.metrics.apply_estimate(per.as_ref());
        log::trace!("{}: {} eye={:.1}", self.name, report.summary, report.eye_opening);
        self.peaks = Some(report);
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stop the engine, flush the log and mark the source stopped.
    pub fn finish_object(mut self) -> LinkReport {
        self.running.store(false, Ordering::Relaxed);
        self.engine.manage(false, EngineReason::Shutdown);
        while self.mailbox.try_recv().is_ok() {}
        self.state = FsmState::Stopped;

        let log_file = self.log.take().and_then(|log| {
            let rows = log.rows();
            match log.finish() {
                Ok(path) => {
                    log::log!(self.detail, "{}: wrote {rows} rows to {}", self.name, path.display());
                    Some(path)
                }
                Err(e) => {
                    log::error!("{}: CSV flush failed: {e}", self.name);
                    None
                }
            }
        });
        let snapshot = self.snapshot();
        self.sink.redraw(&snapshot);
        log::info!(
            "{}: stopped after {} polls, {} slices",
            self.name,
            self.polls,
            self.buffer.received()
        );

        LinkReport {
            link: self.link,
            snapshot,
            log_file,
            malformed: self.malformed,
            engine_restarts: self.engine.restarts,
        }
    }
}

// ---------------------------------------------------------------------------
// LinkHandle
// ---------------------------------------------------------------------------

/// Control side of a spawned link worker.
pub struct LinkHandle {
    link: Link,
    sender: Sender<SourceEvent>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<LinkReport>,
}

impl LinkHandle {
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Mailbox of the worker, for flow control.
    pub(crate) fn sender(&self) -> Sender<SourceEvent> {
        self.sender.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.thread.is_finished()
    }

    pub fn enable(&self) {
        let _ = self.sender.send(SourceEvent::Enable);
    }

    pub fn disable(&self) {
        let _ = self.sender.send(SourceEvent::Disable);
    }

    /// Ask the worker to stop; it exits on its next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.sender.send(SourceEvent::Wake);
    }

    /// Wait for the worker. `None` if it panicked.
    pub fn join(self) -> Option<LinkReport> {
        let name = self.link.name();
        match self.thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                log::error!("{name}: worker panicked");
                None
            }
        }
    }

    pub fn finish(self) -> Option<LinkReport> {
        self.stop();
        self.join()
    }
}
