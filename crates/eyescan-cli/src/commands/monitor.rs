use std::sync::Arc;

use eyescan_core::{DashboardBoard, ViewArena};

use super::{ScanArgs, fail};

pub fn run(scan: &ScanArgs, refresh: f64, record: bool) {
    let (config, links, hardware) = scan.prepare();
    let board = Arc::new(DashboardBoard::default());
    let arena = match ViewArena::launch(config, hardware, board.clone(), links, record) {
        Ok(a) => a,
        Err(e) => fail(&e.to_string()),
    };

    let mut app = crate::tui::app::App::new(arena, board, refresh);
    if let Err(e) = app.run() {
        eprintln!("TUI error: {e}");
    }
    match app.finish() {
        Ok(Some(summary)) => {
            if let Some(path) = summary.meta_path {
                println!("Run saved to {}", path.display());
            }
        }
        Ok(None) => {}
        Err(e) => fail(&format!("finalizing run: {e}")),
    }
}
