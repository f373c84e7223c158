//! Event definitions for the session event loop.
//!
//! All state transitions flow through a single mpsc channel consumed by the
//! coordination loop in `main`: scheduler dispatch notices, pty output chunks,
//! child exits, and user/system input.

use crossterm::event::KeyEvent;

/// Represents an event in the session's main event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A command was pulled from the task source and assigned a pane slot.
    CommandDispatched {
        id: usize,
        slot: usize,
        line: String,
        pid: Option<u32>,
    },
    /// Opening the pty or spawning the child failed; the command ends Failed.
    CommandSpawnFailed { id: usize, error: String },
    /// Raw bytes read from a command's pty.
    CommandOutput { id: usize, bytes: Vec<u8> },
    /// A command reached a terminal state. `killed` is set when the exit was
    /// forced by cancellation, regardless of the code the OS reported.
    CommandExited {
        id: usize,
        code: Option<i32>,
        killed: bool,
    },
    /// A command was discarded by cancellation before it was ever spawned.
    CommandAborted { id: usize, line: String },
    /// The task source yielded its last command; `total` is the final count.
    SourceExhausted { total: usize },
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// Ctrl-C / SIGTERM: cancel the run and shut down.
    Shutdown,
}
