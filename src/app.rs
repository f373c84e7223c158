//! Session state: every command the run has seen, and the pane slots.
//!
//! The app is a pure event consumer. The scheduler owns the processes; this
//! struct only records what the event channel reports, which keeps it
//! directly testable without spawning anything.

use crate::command::{Command, CommandStatus, RunnerState};

pub struct App {
    /// Runner states in command order; a command's id indexes this vec.
    runners: Vec<RunnerState>,
    /// `slots[i]` is the id of the command currently shown in pane `i`.
    slots: Vec<Option<usize>>,
    /// Final command count, known once the source is exhausted.
    total_known: Option<usize>,
    pub aborted: bool,
    pane_cols: u16,
    pane_rows: u16,
    tail_lines: usize,
}

impl App {
    pub fn new(slot_count: usize, pane_cols: u16, pane_rows: u16, tail_lines: usize) -> Self {
        Self {
            runners: Vec::new(),
            slots: vec![None; slot_count],
            total_known: None,
            aborted: false,
            pane_cols,
            pane_rows,
            tail_lines,
        }
    }

    pub fn on_dispatched(&mut self, id: usize, slot: usize, line: String, pid: Option<u32>) {
        debug_assert_eq!(id, self.runners.len());
        self.runners.push(RunnerState::running(
            Command::new(line, id),
            pid,
            self.pane_cols,
            self.pane_rows,
            self.tail_lines,
        ));
        if let Some(slot) = self.slots.get_mut(slot) {
            *slot = Some(id);
        }
    }

    pub fn on_spawn_failed(&mut self, id: usize, error: String) {
        if let Some(runner) = self.runners.get_mut(id) {
            runner.error = Some(error);
            let _ = runner.finish(CommandStatus::Failed { code: None });
        }
        self.free_slot(id);
    }

    /// Routes a pty chunk to its runner. Returns the plain-text lines the
    /// chunk completed, which plain mode prints.
    pub fn on_output(&mut self, id: usize, bytes: &[u8]) -> Vec<String> {
        match self.runners.get_mut(id) {
            Some(runner) => runner.apply_chunk(bytes),
            None => Vec::new(),
        }
    }

    /// Marks the runner terminal. Returns the flushed unterminated final
    /// line, which plain mode still needs to print.
    pub fn on_exited(&mut self, id: usize, code: Option<i32>, killed: bool) -> Option<String> {
        if killed {
            self.aborted = true;
        }
        self.runners
            .get_mut(id)
            .and_then(|runner| runner.finish(CommandStatus::from_exit(code, killed)))
    }

    pub fn on_aborted(&mut self, id: usize, line: String) {
        debug_assert_eq!(id, self.runners.len());
        self.aborted = true;
        self.runners.push(RunnerState::killed_before_start(Command::new(line, id)));
    }

    pub fn on_source_exhausted(&mut self, total: usize) {
        self.total_known = Some(total);
    }

    fn free_slot(&mut self, id: usize) {
        for slot in &mut self.slots {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    pub fn runner(&self, id: usize) -> Option<&RunnerState> {
        self.runners.get(id)
    }

    pub fn slots(&self) -> &[Option<usize>] {
        &self.slots
    }

    pub fn slot_runner(&self, slot: usize) -> Option<&RunnerState> {
        self.slots.get(slot).copied().flatten().and_then(|id| self.runners.get(id))
    }

    pub fn completed(&self) -> usize {
        self.runners.iter().filter(|r| r.status.is_terminal()).count()
    }

    pub fn failed(&self) -> usize {
        self.runners.iter().filter(|r| r.status.is_failure()).count()
    }

    /// Total commands: exact once the source is exhausted, otherwise a
    /// running lower bound.
    pub fn total(&self) -> (usize, bool) {
        match self.total_known {
            Some(total) => (total, true),
            None => (self.runners.len(), false),
        }
    }

    /// True once every command is accounted for and none is still running.
    pub fn done(&self) -> bool {
        self.total_known == Some(self.runners.len())
            && self.runners.iter().all(|r| r.status.is_terminal())
    }

    pub fn into_result(self) -> RunResult {
        RunResult {
            runners: self.runners,
            aborted: self.aborted,
        }
    }
}

/// The outcome of a finished run.
pub struct RunResult {
    pub runners: Vec<RunnerState>,
    pub aborted: bool,
}

impl RunResult {
    /// 0 when every command succeeded, 1 when any failed, 2 when the run was
    /// cut short before all commands could finish.
    pub fn exit_code(&self) -> i32 {
        if self.aborted {
            2
        } else if self.runners.iter().any(|r| r.status.is_failure()) {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> App {
        App::new(2, 40, 5, 8)
    }

    #[test]
    fn tracks_dispatch_output_and_exit() {
        let mut a = app();
        a.on_dispatched(0, 0, "echo hi".into(), Some(100));
        assert_eq!(a.on_output(0, b"hi\n"), vec!["hi"]);
        let _ = a.on_exited(0, Some(0), false);
        a.on_source_exhausted(1);
        assert!(a.done());
        assert_eq!(a.completed(), 1);
        assert_eq!(a.failed(), 0);
        assert_eq!(a.into_result().exit_code(), 0);
    }

    #[test]
    fn slot_reuse_points_pane_at_new_command() {
        let mut a = app();
        a.on_dispatched(0, 0, "first".into(), Some(1));
        let _ = a.on_exited(0, Some(0), false);
        a.on_dispatched(1, 0, "second".into(), Some(2));
        assert_eq!(a.slot_runner(0).unwrap().command.line, "second");
    }

    #[test]
    fn spawn_failure_is_a_failed_command_with_free_slot() {
        let mut a = app();
        a.on_dispatched(0, 1, "bogus".into(), None);
        a.on_spawn_failed(0, "no pty".into());
        assert_eq!(a.failed(), 1);
        assert!(a.slot_runner(1).is_none());
        assert!(a.runner(0).unwrap().error.is_some());
    }

    #[test]
    fn failure_without_abort_exits_one() {
        let mut a = app();
        a.on_dispatched(0, 0, "false".into(), Some(1));
        let _ = a.on_exited(0, Some(1), false);
        a.on_source_exhausted(1);
        assert!(a.done());
        assert_eq!(a.into_result().exit_code(), 1);
    }

    #[test]
    fn killed_and_aborted_commands_exit_two() {
        let mut a = app();
        a.on_dispatched(0, 0, "false".into(), Some(1));
        a.on_dispatched(1, 1, "sleep 9".into(), Some(2));
        let _ = a.on_exited(0, Some(1), false);
        let _ = a.on_exited(1, None, true);
        a.on_aborted(2, "never ran".into());
        a.on_source_exhausted(3);
        assert!(a.done());
        assert_eq!(a.failed(), 3);
        let result = a.into_result();
        assert!(result.aborted);
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn exit_surfaces_the_unterminated_final_line() {
        let mut a = app();
        a.on_dispatched(0, 0, "printf no-newline".into(), Some(1));
        assert!(a.on_output(0, b"no-newline").is_empty());
        assert_eq!(a.on_exited(0, Some(0), false), Some("no-newline".to_string()));
        // Already flushed; a second exit event has nothing left.
        assert_eq!(a.on_exited(0, Some(0), false), None);
    }

    #[test]
    fn done_waits_for_exhaustion_and_terminal_states() {
        let mut a = app();
        a.on_dispatched(0, 0, "sleep 1".into(), Some(1));
        assert!(!a.done());
        a.on_source_exhausted(1);
        assert!(!a.done());
        let _ = a.on_exited(0, Some(0), false);
        assert!(a.done());
    }
}
