//! TUI rendering - link table plus the selected link's eye and trends.
//!
//! ┌──────────────────────────────────────────────────────────┐
//! │  eyescan   4 links  53 Gbps PAM4  self   00:42           │
//! ├───────────────────────────────┬──────────────────────────┤
//! │  Link         St Status  BER  │  ▁▃█▃▁ ▁▃█▃▁ ▁▃█▃▁ ▁▃█▃▁ │
//! │▸ YK-Quad_900  10 53 Gbps 1e-12│  histogram               │
//! │  YK-Quad_900   8 53 Gbps 1e-12├──────────────────────────┤
//! │                               │  BER trend               │
//! ├───────────────────────────────┼──────────────────────────┤
//! │  Peaks / PER / comment        │  SNR trend               │
//! ├───────────────────────────────┴──────────────────────────┤
//! │  ↑↓ select   p: pause   +/-: refresh   q: quit           │
//! └──────────────────────────────────────────────────────────┘

use super::app::App;
use eyescan_core::config::NO_LINK;
use ratatui::{prelude::*, widgets::*};

use crate::commands::format_ber;

pub fn draw(f: &mut Frame, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Min(12),   // main
            Constraint::Length(1), // keys
        ])
        .split(f.area());

    draw_title(f, rows[0], app);
    draw_main(f, rows[1], app);
    draw_keys(f, rows[2]);
}

fn draw_title(f: &mut Frame, area: Rect, app: &App) {
    let secs = app.elapsed().as_secs();
    let paused = if app.is_paused() { "  [paused]" } else { "" };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Line::from(vec![
            Span::styled(" eyescan ", Style::default().bold().fg(Color::Cyan)),
            Span::raw(format!("  {}  ", app.header())),
            Span::styled(
                format!(
                    "{:02}:{:02}:{:02}  refresh {}ms{paused} ",
                    secs / 3600,
                    secs / 60 % 60,
                    secs % 60,
                    app.refresh_rate().as_millis()
                ),
                Style::default().fg(Color::DarkGray),
            ),
        ]));
    f.render_widget(block, area);
}

fn draw_main(f: &mut Frame, area: Rect, app: &App) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(7)])
        .split(cols[0]);
    draw_link_table(f, left[0], app);
    draw_details(f, left[1], app);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(50),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ])
        .split(cols[1]);
    draw_histogram(f, right[0], app);
    draw_trends(f, right[1], right[2], app);
}

fn draw_link_table(f: &mut Frame, area: Rect, app: &App) {
    let rows: Vec<Row> = app
        .snapshots()
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let m = &s.metrics;
            let is_cursor = i == app.cursor();
            let pointer = if is_cursor { "▸" } else { " " };
            let per = m.per.map_or_else(|| "—".to_string(), |p| format!("{p:.1e}"));
            let engine = if s.engine_running { "●" } else { " " };

            let style = if is_cursor {
                Style::default().bg(Color::DarkGray).fg(Color::White)
            } else if m.status == NO_LINK {
                Style::default().fg(Color::Red)
            } else if !s.state.is_running() {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::Green)
            };

            Row::new(vec![
                pointer.to_string(),
                s.name.clone(),
                s.state.code().to_string(),
                engine.to_string(),
                m.status.clone(),
                format_ber(m.ber, s.polls),
                format!("{:.1}", m.snr),
                format!("{:.1}", m.eye_opening),
                per,
                s.scans.to_string(),
            ])
            .style(style)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),  // pointer
            Constraint::Length(18), // name
            Constraint::Length(3),  // state
            Constraint::Length(2),  // engine
            Constraint::Length(9),  // status
            Constraint::Length(8),  // ber
            Constraint::Length(5),  // snr
            Constraint::Length(5),  // eye
            Constraint::Length(8),  // per
            Constraint::Length(6),  // scans
        ],
    )
    .header(
        Row::new(vec!["", "Link", "St", "", "Status", "BER", "SNR", "Eye", "PER", "Scans"])
            .style(Style::default().bold()),
    )
    .block(Block::default().borders(Borders::ALL).title(" Links "));

    f.render_widget(table, area);
}

fn draw_details(f: &mut Frame, area: Rect, app: &App) {
    let text = match app.selected_snapshot() {
        Some(s) => {
            let m = &s.metrics;
            vec![
                Line::from(Span::styled(
                    format!("{}  {}", s.name, s.state),
                    Style::default().bold().fg(Color::Cyan),
                )),
                Line::from(format!("{}  bits={} errors={}", m.line_rate, m.bit_count, m.error_count)),
                Line::from(m.hist_summary.clone()),
                Line::from(m.per_summary.clone()),
                Line::from(Span::styled(m.comment.clone(), Style::default().fg(Color::DarkGray))),
            ]
        }
        None => vec![Line::from("Waiting for links...")],
    };
    let p = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(" Details "));
    f.render_widget(p, area);
}

fn draw_histogram(f: &mut Frame, area: Rect, app: &App) {
    let Some(board) = app.selected().filter(|b| !b.histogram.is_empty()) else {
        let block = Block::default().borders(Borders::ALL).title(" Amplitude histogram ");
        let p = Paragraph::new("No slices yet")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        f.render_widget(p, area);
        return;
    };

    let columns = downsample(&board.histogram, usize::from(area.width.saturating_sub(2)));
    let bars: Vec<(&str, u64)> = columns.iter().map(|&c| ("", c)).collect();
    let title = match &board.report {
        Some(r) => format!(" Amplitude histogram  eye {:.1} ", r.eye_opening),
        None => " Amplitude histogram ".to_string(),
    };
    let chart = BarChart::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .data(bars.as_slice())
        .bar_width(1)
        .bar_gap(0)
        .bar_style(Style::default().fg(Color::Yellow));
    f.render_widget(chart, area);
}

fn draw_trends(f: &mut Frame, ber_area: Rect, snr_area: Rect, app: &App) {
    let (ber, snr) = match app.selected() {
        Some(b) => (
            b.ber_trend.iter().map(|&v| ber_height(v)).collect::<Vec<u64>>(),
            b.snr_trend.iter().map(|&v| (v.max(0.0) * 10.0).round() as u64).collect::<Vec<u64>>(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    let ber_line = Sparkline::default()
        .block(Block::default().borders(Borders::ALL).title(" BER (-log10) "))
        .data(&ber)
        .style(Style::default().fg(Color::Green));
    f.render_widget(ber_line, ber_area);

    let snr_line = Sparkline::default()
        .block(Block::default().borders(Borders::ALL).title(" SNR (dB) "))
        .data(&snr)
        .style(Style::default().fg(Color::Cyan));
    f.render_widget(snr_line, snr_area);
}

fn draw_keys(f: &mut Frame, area: Rect) {
    let bar = Paragraph::new(" ↑↓ select link   p: pause   +/-: refresh rate   q: quit")
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(bar, area);
}

/// Sum adjacent bins so the histogram fits `columns` bars.
fn downsample(counts: &[u64], columns: usize) -> Vec<u64> {
    if columns == 0 || counts.is_empty() {
        return Vec::new();
    }
    if counts.len() <= columns {
        return counts.to_vec();
    }
    let group = counts.len().div_ceil(columns);
    counts.chunks(group).map(|c| c.iter().sum()).collect()
}

/// Sparkline height for a BER: ten steps per decade, zero for a clean link.
fn ber_height(ber: f64) -> u64 {
    if ber > 0.0 {
        (-ber.log10() * 10.0).round().max(0.0) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_fits_width() {
        let counts: Vec<u64> = (0..100).collect();
        let out = downsample(&counts, 30);
        assert!(out.len() <= 30);
        assert_eq!(out.iter().sum::<u64>(), counts.iter().sum::<u64>());
    }

    #[test]
    fn test_downsample_passthrough_and_empty() {
        assert_eq!(downsample(&[1, 2, 3], 10), vec![1, 2, 3]);
        assert!(downsample(&[1, 2, 3], 0).is_empty());
    }

    #[test]
    fn test_ber_height() {
        assert_eq!(ber_height(1e-12), 120);
        assert_eq!(ber_height(0.0), 0);
        assert_eq!(ber_height(1.0), 0);
    }
}
