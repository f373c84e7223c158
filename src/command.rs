//! Per-command state tracked by the session.

use std::time::Instant;

use crate::output::TailBuffer;
use crate::screen::PaneScreen;

/// A shell command line and its position in the overall run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub line: String,
    pub index: usize,
}

impl Command {
    pub fn new(line: impl Into<String>, index: usize) -> Self {
        Self {
            line: line.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Running,
    Succeeded,
    Failed { code: Option<i32> },
    /// Terminated by cancellation, or never started because of it.
    Killed,
}

impl CommandStatus {
    pub fn from_exit(code: Option<i32>, killed: bool) -> Self {
        if killed {
            CommandStatus::Killed
        } else {
            match code {
                Some(0) => CommandStatus::Succeeded,
                other => CommandStatus::Failed { code: other },
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::Running)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, CommandStatus::Failed { .. } | CommandStatus::Killed)
    }
}

/// Everything the session knows about one dispatched command: its status,
/// the pane screen it renders into, and the output tail kept for the summary.
#[derive(Debug)]
pub struct RunnerState {
    pub command: Command,
    pub status: CommandStatus,
    pub pid: Option<u32>,
    pub screen: PaneScreen,
    pub tail: TailBuffer,
    /// Spawn error text, when the command never produced a pty.
    pub error: Option<String>,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

impl RunnerState {
    pub fn running(
        command: Command,
        pid: Option<u32>,
        pane_cols: u16,
        pane_rows: u16,
        tail_lines: usize,
    ) -> Self {
        Self {
            command,
            status: CommandStatus::Running,
            pid,
            screen: PaneScreen::new(pane_cols, pane_rows),
            tail: TailBuffer::new(tail_lines),
            error: None,
            started_at: Instant::now(),
            finished_at: None,
        }
    }

    /// A command discarded by cancellation before it was spawned.
    pub fn killed_before_start(command: Command) -> Self {
        let now = Instant::now();
        Self {
            command,
            status: CommandStatus::Killed,
            pid: None,
            screen: PaneScreen::new(1, 1),
            tail: TailBuffer::new(1),
            error: None,
            started_at: now,
            finished_at: Some(now),
        }
    }

    /// Feeds a pty chunk into both the pane screen and the summary tail.
    /// Returns the plain-text lines the chunk completed.
    pub fn apply_chunk(&mut self, bytes: &[u8]) -> Vec<String> {
        self.screen.feed(bytes);
        self.tail.feed(bytes)
    }

    /// Marks the runner terminal. Returns the flushed unterminated final
    /// line, if there was one.
    pub fn finish(&mut self, status: CommandStatus) -> Option<String> {
        self.status = status;
        self.finished_at = Some(Instant::now());
        self.tail.finish()
    }

    pub fn elapsed_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Instant::now);
        end.duration_since(self.started_at).as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_exit_maps_codes() {
        assert_eq!(CommandStatus::from_exit(Some(0), false), CommandStatus::Succeeded);
        assert_eq!(
            CommandStatus::from_exit(Some(2), false),
            CommandStatus::Failed { code: Some(2) }
        );
        assert_eq!(
            CommandStatus::from_exit(None, false),
            CommandStatus::Failed { code: None }
        );
        // A forced kill wins over whatever code the OS reported.
        assert_eq!(CommandStatus::from_exit(Some(0), true), CommandStatus::Killed);
    }

    #[test]
    fn finish_flushes_partial_tail() {
        let mut state = RunnerState::running(Command::new("echo -n hi", 0), Some(1), 20, 4, 8);
        assert!(state.apply_chunk(b"hi").is_empty());
        assert_eq!(state.finish(CommandStatus::Succeeded), Some("hi".to_string()));
        assert_eq!(state.tail.iter().cloned().collect::<Vec<_>>(), vec!["hi"]);
        assert!(state.status.is_terminal());
        assert!(state.finished_at.is_some());
    }
}
