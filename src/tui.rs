//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on
//! exit, and drawing the pane grid using `ratatui`. Each slot renders its
//! command's screen model inside a bordered pane; a one-line status bar sits
//! at the bottom.

use std::io::{self, Stdout};

use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use crate::app::App;
use crate::command::CommandStatus;

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Initializes the terminal for TUI mode.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Arranges `slots` panes into a near-square grid: three rows when the count
/// divides by three, two when it divides by two, otherwise a single row.
pub fn grid_dims(slots: usize) -> (usize, usize) {
    let slots = slots.max(1);
    let rows = if slots % 3 == 0 {
        3
    } else if slots % 2 == 0 {
        2
    } else {
        1
    };
    (rows, slots / rows)
}

/// The inner text size of one pane for a terminal of `width` x `height`,
/// after the grid split, pane borders, and the status bar are accounted for.
/// Ptys are created with this size so children wrap where the pane does.
pub fn pane_inner_size(width: u16, height: u16, slots: usize) -> (u16, u16) {
    let (rows, cols) = grid_dims(slots);
    let grid_height = height.saturating_sub(1); // status bar
    let pane_width = width / cols as u16;
    let pane_height = grid_height / rows as u16;
    // Borders eat one cell on each side.
    (pane_width.saturating_sub(2).max(1), pane_height.saturating_sub(2).max(1))
}

/// Draws the current pane grid and status bar.
pub fn draw(app: &App, terminal: &mut TuiTerminal) -> io::Result<()> {
    terminal.draw(|frame| {
        let area = frame.size();
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);

        let slot_count = app.slots().len();
        let (rows, cols) = grid_dims(slot_count);
        let row_areas = Layout::default()
            .direction(Direction::Vertical)
            .constraints(vec![Constraint::Ratio(1, rows as u32); rows])
            .split(vertical[0]);

        let mut slot = 0;
        for row_area in row_areas.iter() {
            let pane_areas = Layout::default()
                .direction(Direction::Horizontal)
                .constraints(vec![Constraint::Ratio(1, cols as u32); cols])
                .split(*row_area);
            for pane_area in pane_areas.iter() {
                if slot < slot_count {
                    draw_pane(frame, app, slot, *pane_area);
                    slot += 1;
                }
            }
        }

        frame.render_widget(status_bar(app), vertical[1]);
    })?;
    Ok(())
}

fn draw_pane(frame: &mut ratatui::Frame, app: &App, slot: usize, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray));

    match app.slot_runner(slot) {
        Some(runner) => {
            let title_width = (area.width as usize).saturating_sub(6);
            let title = Line::from(vec![
                Span::styled(
                    format!(" {} ", status_char(runner.status)),
                    status_style(runner.status),
                ),
                Span::raw(truncate(&runner.command.line, title_width)),
                Span::raw(" "),
            ]);
            let block = block.title(title);
            let body = match &runner.error {
                Some(error) => Paragraph::new(Line::from(Span::styled(
                    error.clone(),
                    Style::default().fg(Color::Red),
                ))),
                None => Paragraph::new(runner.screen.snapshot()),
            };
            frame.render_widget(body.block(block), area);
        }
        None => {
            let placeholder = Paragraph::new(Span::styled(
                "idle",
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::DIM),
            ))
            .block(block);
            frame.render_widget(placeholder, area);
        }
    }
}

fn status_bar(app: &App) -> Paragraph<'static> {
    let (total, exact) = app.total();
    let total = if exact {
        total.to_string()
    } else {
        format!("{total}+")
    };
    let failed = app.failed();
    let mut spans = vec![Span::raw(format!(
        " {} / {} completed",
        app.completed(),
        total
    ))];
    if failed > 0 {
        spans.push(Span::styled(
            format!(", {failed} failed"),
            Style::default().fg(Color::Red),
        ));
    }
    if app.aborted {
        spans.push(Span::styled(
            ", aborting",
            Style::default().fg(Color::Yellow),
        ));
    } else {
        spans.push(Span::styled(
            "  (q or Ctrl-C to abort)",
            Style::default().fg(Color::DarkGray),
        ));
    }
    Paragraph::new(Line::from(spans))
}

fn status_char(status: CommandStatus) -> char {
    match status {
        CommandStatus::Running => '>',
        CommandStatus::Succeeded => 'o',
        CommandStatus::Failed { .. } => 'x',
        CommandStatus::Killed => '!',
    }
}

fn status_style(status: CommandStatus) -> Style {
    match status {
        CommandStatus::Running => Style::default().fg(Color::Green),
        CommandStatus::Succeeded => Style::default().fg(Color::Gray),
        CommandStatus::Failed { .. } => Style::default().fg(Color::Red),
        CommandStatus::Killed => Style::default().fg(Color::Yellow),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out = text.chars().take(max.saturating_sub(1)).collect::<String>();
    out.push('~');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_prefers_three_then_two_rows() {
        assert_eq!(grid_dims(6), (3, 2));
        assert_eq!(grid_dims(9), (3, 3));
        assert_eq!(grid_dims(4), (2, 2));
        assert_eq!(grid_dims(2), (2, 1));
        assert_eq!(grid_dims(5), (1, 5));
        assert_eq!(grid_dims(1), (1, 1));
    }

    #[test]
    fn pane_size_subtracts_borders_and_status_bar() {
        // 80x25, 4 slots: 2x2 grid over 24 rows, 40x12 panes, 38x10 inner.
        assert_eq!(pane_inner_size(80, 25, 4), (38, 10));
    }

    #[test]
    fn pane_size_never_reaches_zero() {
        assert_eq!(pane_inner_size(2, 2, 9), (1, 1));
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer command line", 8), "a longe~");
        assert_eq!(truncate("x", 0), "");
    }
}
