//! Bounded-parallelism command dispatch.
//!
//! The scheduler owns the pty sessions. It keeps at most one running command
//! per pane slot, reaps exits on every poll tick, refills freed slots from
//! the task source, and on cancellation escalates from SIGTERM to SIGKILL
//! after a grace period. Everything it learns is reported through the session
//! event channel; it never touches UI state directly.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::command::Command;
use crate::events::Event;
use crate::pty::PtySession;
use crate::source::{NextCommand, TaskSource};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

struct ActiveSession {
    id: usize,
    slot: usize,
    session: PtySession,
    /// Set on cancellation: when it passes, the child is SIGKILLed.
    deadline: Option<Instant>,
}

pub struct Scheduler {
    source: TaskSource,
    event_tx: UnboundedSender<Event>,
    /// `slots[i]` holds the id of the command currently in pane `i`.
    slots: Vec<Option<usize>>,
    active: Vec<ActiveSession>,
    pane_cols: u16,
    pane_rows: u16,
    break_on_fail: bool,
    grace: Duration,
    cancelled: bool,
    exhausted: bool,
    dispatched: usize,
}

impl Scheduler {
    pub fn new(
        source: TaskSource,
        event_tx: UnboundedSender<Event>,
        slot_count: usize,
        pane_cols: u16,
        pane_rows: u16,
        break_on_fail: bool,
        grace: Duration,
    ) -> Self {
        Self {
            source,
            event_tx,
            slots: vec![None; slot_count],
            active: Vec::with_capacity(slot_count),
            pane_cols,
            pane_rows,
            break_on_fail,
            grace,
            cancelled: false,
            exhausted: false,
            dispatched: 0,
        }
    }

    /// Fills every free slot from the task source.
    pub fn start(&mut self) {
        self.fill_slots();
    }

    /// One scheduling tick: escalate expired kill deadlines, reap exited
    /// children, then refill freed slots.
    pub fn poll(&mut self) {
        let now = Instant::now();
        for active in &mut self.active {
            if matches!(active.deadline, Some(deadline) if deadline <= now) {
                log::debug!("command {} ignored SIGTERM, killing", active.id);
                active.session.force_kill();
                active.deadline = None;
            }
        }

        let mut failed = false;
        let mut i = 0;
        while i < self.active.len() {
            if let Some(code) = self.active[i].session.try_wait() {
                let mut done = self.active.swap_remove(i);
                done.session.shutdown();
                self.slots[done.slot] = None;
                let killed = self.cancelled;
                if !killed && code != Some(0) {
                    failed = true;
                }
                let _ = self.event_tx.send(Event::CommandExited {
                    id: done.id,
                    code,
                    killed,
                });
            } else {
                i += 1;
            }
        }

        // Cancel before refilling, or a freed slot would restart dispatch in
        // the same tick the failure was observed.
        if failed && self.break_on_fail {
            self.cancel_all();
        }

        self.fill_slots();
    }

    fn fill_slots(&mut self) {
        if self.cancelled {
            return;
        }
        while let Some(slot) = self.slots.iter().position(|slot| slot.is_none()) {
            match self.source.next_command() {
                NextCommand::Ready(command) => self.dispatch(command, slot),
                // Input still in flight; the next tick retries.
                NextCommand::Pending => break,
                NextCommand::Exhausted => {
                    self.mark_exhausted();
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, command: Command, slot: usize) {
        let id = command.index;
        self.dispatched += 1;
        match PtySession::spawn(&command.line, self.pane_cols, self.pane_rows) {
            Ok(mut session) => {
                // Dispatch goes on the channel first so the consumer has the
                // pane registered before any output chunk arrives.
                let _ = self.event_tx.send(Event::CommandDispatched {
                    id,
                    slot,
                    line: command.line.clone(),
                    pid: session.pid(),
                });
                if let Err(err) = session.start_pump(id, self.event_tx.clone()) {
                    log::warn!("output pump for `{}` failed: {err}", command.line);
                }
                self.slots[slot] = Some(id);
                self.active.push(ActiveSession {
                    id,
                    slot,
                    session,
                    deadline: None,
                });
            }
            Err(err) => {
                let _ = self.event_tx.send(Event::CommandDispatched {
                    id,
                    slot,
                    line: command.line.clone(),
                    pid: None,
                });
                let _ = self.event_tx.send(Event::CommandSpawnFailed {
                    id,
                    error: err.to_string(),
                });
                if self.break_on_fail {
                    self.cancel_all();
                }
            }
        }
    }

    /// Stops the run: running commands get SIGTERM with a kill deadline, and
    /// every known-but-undispatched command is reported as aborted.
    pub fn cancel_all(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        let deadline = Instant::now() + self.grace;
        for active in &mut self.active {
            active.session.terminate();
            active.deadline = Some(deadline);
        }
        let remaining = self.source.drain();
        let aborted = remaining.len();
        for command in remaining {
            let _ = self.event_tx.send(Event::CommandAborted {
                id: command.index,
                line: command.line,
            });
        }
        if !self.exhausted {
            self.exhausted = true;
            let _ = self.event_tx.send(Event::SourceExhausted {
                total: self.dispatched + aborted,
            });
        }
    }

    fn mark_exhausted(&mut self) {
        if !self.exhausted {
            self.exhausted = true;
            let _ = self.event_tx.send(Event::SourceExhausted {
                total: self.dispatched,
            });
        }
    }

    pub fn running(&self) -> usize {
        self.active.len()
    }

    /// True once no child is alive and no command remains to dispatch.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn run_to_idle(scheduler: &mut Scheduler, rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        scheduler.start();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while !scheduler.is_idle() {
            assert!(Instant::now() < deadline, "scheduler did not go idle");
            std::thread::sleep(Duration::from_millis(20));
            scheduler.poll();
            events.extend(drain_events(rx));
        }
        events.extend(drain_events(rx));
        events
    }

    #[test]
    fn never_exceeds_slot_count() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::fixed(vec!["sleep 0.1".into(); 5]);
        let mut scheduler = Scheduler::new(source, tx, 2, 40, 5, false, DEFAULT_GRACE);
        scheduler.start();
        assert_eq!(scheduler.running(), 2);
        let deadline = Instant::now() + Duration::from_secs(10);
        while !scheduler.is_idle() {
            assert!(Instant::now() < deadline);
            assert!(scheduler.running() <= 2);
            std::thread::sleep(Duration::from_millis(20));
            scheduler.poll();
        }
        let events = drain_events(&mut rx);
        let exits = events
            .iter()
            .filter(|e| matches!(e, Event::CommandExited { .. }))
            .count();
        assert_eq!(exits, 5);
    }

    #[test]
    fn reports_exit_codes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::fixed(vec!["true".into(), "exit 3".into()]);
        let mut scheduler = Scheduler::new(source, tx, 2, 40, 5, false, DEFAULT_GRACE);
        let events = run_to_idle(&mut scheduler, &mut rx);
        let mut codes = events
            .iter()
            .filter_map(|e| match e {
                Event::CommandExited { id, code, .. } => Some((*id, *code)),
                _ => None,
            })
            .collect::<Vec<_>>();
        codes.sort();
        assert_eq!(codes, vec![(0, Some(0)), (1, Some(3))]);
    }

    #[test]
    fn dispatch_precedes_output_and_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::fixed(vec!["echo out".into()]);
        let mut scheduler = Scheduler::new(source, tx, 1, 40, 5, false, DEFAULT_GRACE);
        let events = run_to_idle(&mut scheduler, &mut rx);
        let dispatched = events
            .iter()
            .position(|e| matches!(e, Event::CommandDispatched { .. }))
            .unwrap();
        for (i, event) in events.iter().enumerate() {
            if matches!(event, Event::CommandOutput { .. } | Event::CommandExited { .. }) {
                assert!(i > dispatched);
            }
        }
    }

    #[test]
    fn dispatches_in_source_yield_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::fixed(vec![
            "sleep 0.3".into(),
            "true".into(),
            "true".into(),
            "true".into(),
        ]);
        let mut scheduler = Scheduler::new(source, tx, 2, 40, 5, false, DEFAULT_GRACE);
        let events = run_to_idle(&mut scheduler, &mut rx);
        // Fast finishers free slots early, but dispatch still follows the
        // source's order.
        let dispatched = events
            .iter()
            .filter_map(|e| match e {
                Event::CommandDispatched { id, .. } => Some(*id),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(dispatched, vec![0, 1, 2, 3]);
    }

    #[test]
    fn xargs_single_slot_runs_in_input_order() {
        use std::io::Cursor;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::xargs_from(
            "echo {}".to_string(),
            "{}".to_string(),
            Box::new(Cursor::new("a\nb\nc\n".to_string())),
        );
        let mut scheduler = Scheduler::new(source, tx, 1, 40, 5, false, DEFAULT_GRACE);
        let events = run_to_idle(&mut scheduler, &mut rx);
        let lines = events
            .iter()
            .filter_map(|e| match e {
                Event::CommandDispatched { line, .. } => Some(line.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(lines, vec!["echo a", "echo b", "echo c"]);
        for (id, value) in ["a", "b", "c"].iter().enumerate() {
            let output = events
                .iter()
                .filter_map(|e| match e {
                    Event::CommandOutput { id: oid, bytes } if *oid == id => Some(bytes.clone()),
                    _ => None,
                })
                .flatten()
                .collect::<Vec<u8>>();
            assert!(String::from_utf8_lossy(&output).contains(value));
        }
    }

    #[test]
    fn break_on_fail_aborts_pending_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::fixed(vec![
            "false".into(),
            "sleep 5".into(),
            "sleep 5".into(),
            "true".into(),
        ]);
        let mut scheduler = Scheduler::new(
            source,
            tx,
            1,
            40,
            5,
            true,
            Duration::from_millis(100),
        );
        let events = run_to_idle(&mut scheduler, &mut rx);
        let aborted = events
            .iter()
            .filter(|e| matches!(e, Event::CommandAborted { .. }))
            .count();
        assert_eq!(aborted, 3);
        assert!(events.iter().any(
            |e| matches!(e, Event::CommandExited { id: 0, code, killed: false } if *code != Some(0))
        ));
    }

    #[test]
    fn cancel_kills_running_and_reports_them_killed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::fixed(vec!["sleep 30".into(), "sleep 30".into(), "true".into()]);
        let mut scheduler = Scheduler::new(
            source,
            tx,
            2,
            40,
            5,
            false,
            Duration::from_millis(100),
        );
        scheduler.start();
        scheduler.cancel_all();
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while !scheduler.is_idle() {
            assert!(Instant::now() < deadline, "cancelled children not reaped");
            std::thread::sleep(Duration::from_millis(20));
            scheduler.poll();
            events.extend(drain_events(&mut rx));
        }
        events.extend(drain_events(&mut rx));
        let killed = events
            .iter()
            .filter(|e| matches!(e, Event::CommandExited { killed: true, .. }))
            .count();
        assert_eq!(killed, 2);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::CommandAborted { id: 2, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::SourceExhausted { total: 3 })));
    }

    #[test]
    fn lazy_source_feeds_slots_on_demand() {
        use std::io::Cursor;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = TaskSource::xargs_from(
            "echo {}".to_string(),
            "{}".to_string(),
            Box::new(Cursor::new("a\nb\nc\n".to_string())),
        );
        let mut scheduler = Scheduler::new(source, tx, 2, 40, 5, false, DEFAULT_GRACE);
        let events = run_to_idle(&mut scheduler, &mut rx);
        let exits = events
            .iter()
            .filter(|e| matches!(e, Event::CommandExited { code: Some(0), .. }))
            .count();
        assert_eq!(exits, 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::SourceExhausted { total: 3 })));
    }
}
