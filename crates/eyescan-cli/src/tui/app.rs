//! TUI application state and event loop.
//!
//! The arena's link workers run on their own threads and publish into a
//! [`DashboardBoard`]. The UI only copies the board at the refresh rate, so
//! drawing never waits on acquisition.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;

use eyescan_core::{DashboardBoard, LinkBoard, LinkSnapshot, RunSummary, ScanError, ViewArena};

const MIN_REFRESH: Duration = Duration::from_millis(100);
const MAX_REFRESH: Duration = Duration::from_secs(10);

pub struct App {
    arena: Option<ViewArena>,
    board: Arc<DashboardBoard>,
    refresh_rate: Duration,
    running: bool,
    paused: bool,
    cursor: usize,
    snapshots: Vec<LinkSnapshot>,
    selected: Option<LinkBoard>,
    header: String,
    started: Instant,
}

impl App {
    pub fn new(arena: ViewArena, board: Arc<DashboardBoard>, refresh: f64) -> Self {
        let config = arena.config();
        let header = format!(
            "{} links  {} Gbps {}  {}",
            arena.len(),
            config.data_rate_gbps,
            config.modulation(),
            config.flow_control
        );
        let refresh_rate = Duration::from_secs_f64(refresh.max(0.0)).clamp(MIN_REFRESH, MAX_REFRESH);
        let mut app = Self {
            arena: Some(arena),
            board,
            refresh_rate,
            running: true,
            paused: false,
            cursor: 0,
            snapshots: Vec::new(),
            selected: None,
            header,
            started: Instant::now(),
        };
        app.refresh_view();
        app
    }

    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // Install panic hook that restores terminal before printing the panic.
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
            original_hook(info);
        }));

        let result = self.run_loop(&mut terminal);

        // Always restore terminal, even if the loop returned an error.
        let _ = std::panic::take_hook();
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;

        result
    }

    fn run_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
        let mut last_tick = Instant::now();

        while self.running {
            terminal.draw(|f| super::ui::draw(f, self))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
            }

            if last_tick.elapsed() >= self.refresh_rate {
                if !self.paused {
                    self.refresh_view();
                }
                last_tick = Instant::now();
            }
        }

        Ok(())
    }

    /// Stop every worker and write run metadata. Only the first call acts.
    pub fn finish(&mut self) -> Result<Option<RunSummary>, ScanError> {
        self.arena.take().map(ViewArena::finish).transpose()
    }

    fn refresh_view(&mut self) {
        self.snapshots = self.board.snapshots();
        if self.cursor >= self.snapshots.len() {
            self.cursor = self.snapshots.len().saturating_sub(1);
        }
        self.selected = self
            .snapshots
            .get(self.cursor)
            .and_then(|s| self.board.board(s.link_id));
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Up | KeyCode::Char('k') => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.refresh_view();
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.cursor + 1 < self.snapshots.len() {
                    self.cursor += 1;
                    self.refresh_view();
                }
            }
            KeyCode::Char('p') => self.paused = !self.paused,
            KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Char(']') => {
                self.refresh_rate = (self.refresh_rate / 2).max(MIN_REFRESH);
            }
            KeyCode::Char('-') | KeyCode::Char('[') => {
                self.refresh_rate = (self.refresh_rate * 2).min(MAX_REFRESH);
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Accessors for the UI
    // -----------------------------------------------------------------------

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn snapshots(&self) -> &[LinkSnapshot] {
        &self.snapshots
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> Option<&LinkBoard> {
        self.selected.as_ref()
    }

    pub fn selected_snapshot(&self) -> Option<&LinkSnapshot> {
        self.snapshots.get(self.cursor)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn refresh_rate(&self) -> Duration {
        self.refresh_rate
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyescan_core::{ScanConfig, SimHardware, SimOptions, simulated_links};

    fn app(links: usize) -> App {
        let config = Arc::new(ScanConfig {
            slicer_size: 200,
            tick_ms: 5,
            stagger_ms: 0,
            ..Default::default()
        });
        let hardware = Arc::new(SimHardware::new(
            Arc::clone(&config),
            SimOptions {
                scan_period: Duration::from_millis(2),
                ..Default::default()
            },
        ));
        let board = Arc::new(DashboardBoard::default());
        let arena = ViewArena::launch(config, hardware, board.clone(), simulated_links(links), false)
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while board.snapshots().len() < links && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        App::new(arena, board, 0.5)
    }

    #[test]
    fn test_cursor_stays_in_bounds() {
        let mut app = app(2);
        assert_eq!(app.snapshots().len(), 2);
        app.handle_key(KeyCode::Up);
        assert_eq!(app.cursor(), 0);
        app.handle_key(KeyCode::Down);
        app.handle_key(KeyCode::Down);
        assert_eq!(app.cursor(), 1);
        assert_eq!(app.selected_snapshot().unwrap().link_id, 1);
        app.finish().unwrap();
    }

    #[test]
    fn test_refresh_rate_keys_are_clamped() {
        let mut app = app(1);
        for _ in 0..10 {
            app.handle_key(KeyCode::Char('+'));
        }
        assert_eq!(app.refresh_rate(), MIN_REFRESH);
        for _ in 0..10 {
            app.handle_key(KeyCode::Char('-'));
        }
        assert_eq!(app.refresh_rate(), MAX_REFRESH);
        app.handle_key(KeyCode::Char('p'));
        assert!(app.is_paused());
        app.handle_key(KeyCode::Char('q'));
        assert!(!app.running);
    }

    #[test]
    fn test_finish_runs_once() {
        let mut app = app(1);
        assert!(app.finish().unwrap().is_some());
        assert!(app.finish().unwrap().is_none());
    }
}
