//! Multi-link coordinator.
//!
//! [`ViewArena`] spawns one [`LinkDataSource`] worker per link, runs the
//! global flow-control rotation when configured, and on shutdown collects
//! every worker's report into `run.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::{FlowControl, ScanConfig};
use crate::error::ScanError;
use crate::hardware::Hardware;
use crate::link::Link;
use crate::session::{LinkLog, RunLayout, RunMeta};
use crate::sink::ViewSink;
use crate::source::{LinkDataSource, LinkHandle, LinkReport, SourceEvent};

/// Outcome of a finished run.
#[derive(Debug)]
pub struct RunSummary {
    pub reports: Vec<LinkReport>,
    /// Path of `run.json`, when the run was recorded.
    pub meta_path: Option<PathBuf>,
    pub duration: Duration,
}

/// Round-robin flow control thread plus the channel that stops it.
struct Rotation {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct ViewArena {
    config: Arc<ScanConfig>,
    hardware_name: String,
    layout: Option<RunLayout>,
    handles: Vec<LinkHandle>,
    rotation: Option<Rotation>,
    started_at: SystemTime,
}

impl ViewArena {
    /// Spawn a worker per link. When `record` is set, each link logs CSV rows
    /// under the run directory and `finish` writes `run.json`.
    ///
    /// A link whose hardware cannot be opened is logged and skipped; the run
    /// fails only if no link starts.
    pub fn launch(
        config: Arc<ScanConfig>,
        hardware: Arc<dyn Hardware>,
        sink: Arc<dyn ViewSink>,
        links: Vec<Link>,
        record: bool,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        if links.is_empty() {
            return Err(ScanError::NoLinks);
        }

        let started_at = SystemTime::now();
        let layout = record.then(|| RunLayout::new(&config, started_at));
        log::info!(
            "launching {} links on {} ({}, {} Gbps {})",
            links.len(),
            hardware.name(),
            config.flow_control,
            config.data_rate_gbps,
            config.modulation()
        );

        let mut handles: Vec<LinkHandle> = Vec::with_capacity(links.len());
        for link in links {
            match Self::spawn_link(&config, hardware.as_ref(), &sink, layout.as_ref(), link) {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(e) => {
                    for handle in handles {
                        handle.finish();
                    }
                    return Err(e);
                }
            }
        }
        if handles.is_empty() {
            return Err(ScanError::NoLinks);
        }

        let rotation = match config.flow_control {
            FlowControl::Global {
                dwell_ms,
                rotation_pause_ms,
            } => {
                let gates: Vec<(String, Sender<SourceEvent>)> =
                    handles.iter().map(|h| (h.link().name(), h.sender())).collect();
                let (stop, stopped) = channel::bounded(1);
                let dwell = Duration::from_millis(dwell_ms);
                let pause = Duration::from_millis(rotation_pause_ms);
                let thread = thread::Builder::new()
                    .name("flow-control".into())
                    .spawn(move || rotate(&gates, dwell, pause, &stopped));
                match thread {
                    Ok(thread) => Some(Rotation { stop, thread }),
                    Err(_) => {
                        for handle in handles {
                            handle.finish();
                        }
                        return Err(ScanError::Spawn("flow-control".into()));
                    }
                }
            }
            FlowControl::SelfThrottle => None,
        };

        Ok(Self {
            config,
            hardware_name: hardware.name().to_string(),
            layout,
            handles,
            rotation,
            started_at,
        })
    }

    fn spawn_link(
        config: &Arc<ScanConfig>,
        hardware: &dyn Hardware,
        sink: &Arc<dyn ViewSink>,
        layout: Option<&RunLayout>,
        link: Link,
    ) -> Result<Option<LinkHandle>, ScanError> {
        let name = link.name();
        let log = match layout {
            Some(layout) => Some(LinkLog::create(&layout.link_log_path(config, &link))?),
            None => None,
        };
        match LinkDataSource::new(link, Arc::clone(config), hardware, Arc::clone(sink), log) {
            Ok(source) => source.spawn().map(Some),
            Err(ScanError::Hardware(e)) => {
                log::error!("{name}: skipped, hardware unavailable: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.handles.iter().map(LinkHandle::link)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// True while any worker is alive.
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(LinkHandle::is_running)
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.layout.as_ref().map(RunLayout::run_dir)
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Stop the rotation and every worker, then write `run.json`.
    pub fn finish(mut self) -> Result<RunSummary, ScanError> {
        let reports = self.shutdown();
        let duration = self.started_at.elapsed().unwrap_or_default();
        let meta_path = match self.layout.take() {
            Some(layout) => {
                let records = reports.iter().map(LinkReport::record).collect();
                let meta = RunMeta::new(
                    &layout,
                    SystemTime::now(),
                    &self.hardware_name,
                    &self.config,
                    records,
                );
                let path = meta.write(layout.run_dir())?;
                log::info!("run metadata written to {}", path.display());
                Some(path)
            }
            None => None,
        };
        Ok(RunSummary {
            reports,
            meta_path,
            duration,
        })
    }

    fn shutdown(&mut self) -> Vec<LinkReport> {
        if let Some(rotation) = self.rotation.take() {
            let _ = rotation.stop.send(());
            if rotation.thread.join().is_err() {
                log::error!("flow-control thread panicked");
            }
        }
        let handles = std::mem::take(&mut self.handles);
        for handle in &handles {
            handle.stop();
        }
        handles.into_iter().filter_map(LinkHandle::join).collect()
    }
}

impl Drop for ViewArena {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Give each link the acquisition window in turn, pausing after every
/// full rotation. Returns when `stop` fires or is dropped.
fn rotate(gates: &[(String, Sender<SourceEvent>)], dwell: Duration, pause: Duration, stop: &Receiver<()>) {
    let interrupted = |wait: Duration| !matches!(stop.recv_timeout(wait), Err(RecvTimeoutError::Timeout));
    loop {
        for (name, gate) in gates {
            log::debug!("flow control: {name} acquiring for {dwell:?}");
            let _ = gate.send(SourceEvent::Enable);
            let done = interrupted(dwell);
            let _ = gate.send(SourceEvent::Disable);
            if done {
                return;
            }
        }
        if interrupted(pause) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::simulated_links;
    use crate::sim::{SimHardware, SimOptions};
    use crate::sink::NullSink;

    fn fast_config() -> ScanConfig {
        ScanConfig {
            slicer_size: 200,
            tick_ms: 5,
            stagger_ms: 0,
            ..Default::default()
        }
    }

    fn sim(config: &Arc<ScanConfig>) -> Arc<dyn Hardware> {
        Arc::new(SimHardware::new(
            Arc::clone(config),
            SimOptions {
                scan_period: Duration::from_millis(2),
                ..Default::default()
            },
        ))
    }

    #[test]
    fn test_launch_without_links_fails() {
        let config = Arc::new(fast_config());
        let result = ViewArena::launch(
            Arc::clone(&config),
            sim(&config),
            Arc::new(NullSink),
            Vec::new(),
            false,
        );
        assert!(matches!(result, Err(ScanError::NoLinks)));
    }

    #[test]
    fn test_launch_rejects_invalid_config() {
        let config = Arc::new(ScanConfig {
            view_slices: 50,
            ..fast_config()
        });
        let result = ViewArena::launch(
            Arc::clone(&config),
            sim(&config),
            Arc::new(NullSink),
            simulated_links(1),
            false,
        );
        assert!(matches!(result, Err(ScanError::Config(_))));
    }

    #[test]
    fn test_unavailable_links_are_skipped() {
        let config = Arc::new(fast_config());
        let hardware: Arc<dyn Hardware> = Arc::new(SimHardware::new(
            Arc::clone(&config),
            SimOptions {
                scan_period: Duration::from_millis(2),
                absent_links: vec![1],
                ..Default::default()
            },
        ));
        let arena = ViewArena::launch(
            Arc::clone(&config),
            Arc::clone(&hardware),
            Arc::new(NullSink),
            simulated_links(3),
            false,
        )
        .unwrap();
        let ids: Vec<usize> = arena.links().map(|l| l.id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(arena.finish().unwrap().reports.len(), 2);

        let all_absent = ViewArena::launch(
            Arc::clone(&config),
            hardware,
            Arc::new(NullSink),
            simulated_links(2).into_iter().skip(1).collect(),
            false,
        );
        assert!(matches!(all_absent, Err(ScanError::NoLinks)));
    }

    #[test]
    fn test_recorded_run_writes_meta() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(ScanConfig {
            csv_path: tmp.path().to_path_buf(),
            test_id: "unit".into(),
            ..fast_config()
        });
        let arena = ViewArena::launch(
            Arc::clone(&config),
            sim(&config),
            Arc::new(NullSink),
            simulated_links(2),
            true,
        )
        .unwrap();
        assert_eq!(arena.len(), 2);
        assert!(arena.run_dir().unwrap().starts_with(tmp.path()));
        thread::sleep(Duration::from_millis(100));

        let summary = arena.finish().unwrap();
        assert_eq!(summary.reports.len(), 2);
        let meta = std::fs::read_to_string(summary.meta_path.unwrap()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&meta).unwrap();
        assert_eq!(json["hardware"], "simulator");
        assert_eq!(json["links"].as_array().unwrap().len(), 2);
        for report in &summary.reports {
            assert!(report.log_file.as_ref().unwrap().exists());
        }
    }

    #[test]
    fn test_rotation_enables_each_link_in_turn() {
        let (a_tx, a_rx) = channel::unbounded();
        let (b_tx, b_rx) = channel::unbounded();
        let gates = vec![("a".to_string(), a_tx), ("b".to_string(), b_tx)];
        let (stop_tx, stop_rx) = channel::bounded(1);
        let rotation = thread::spawn(move || {
            rotate(&gates, Duration::from_millis(5), Duration::from_millis(5), &stop_rx);
        });
        thread::sleep(Duration::from_millis(60));
        stop_tx.send(()).unwrap();
        rotation.join().unwrap();

        for rx in [a_rx, b_rx] {
            let events: Vec<SourceEvent> = rx.try_iter().collect();
            assert!(events.len() >= 2);
            assert!(matches!(events[0], SourceEvent::Enable));
            // Every window is closed again, including the one open at stop.
            assert!(matches!(events.last(), Some(SourceEvent::Disable)));
        }
    }
}
