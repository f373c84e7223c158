//! Pty-backed child processes.
//!
//! Every command runs under `sh -c` attached to its own pty, sized to the
//! pane it will render in, so children see a real terminal and emit progress
//! bars, colors, and carriage-return updates exactly as they would
//! interactively. A dedicated reader thread pumps master-side output into the
//! session event channel as raw chunks.

use std::io::Read;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::RunError;
use crate::events::Event;

const READ_CHUNK: usize = 4096;

pub struct PtySession {
    master: Option<Box<dyn MasterPty + Send>>,
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
    command: String,
}

impl PtySession {
    /// Allocates a pty sized `cols` x `rows` and spawns `sh -c line` on its
    /// slave side.
    pub fn spawn(line: &str, cols: u16, rows: u16) -> Result<Self, RunError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| RunError::Spawn {
                command: line.to_string(),
                reason: err.to_string(),
            })?;

        let mut builder = CommandBuilder::new("sh");
        builder.arg("-c");
        builder.arg(line);
        let term = std::env::var("TERM").unwrap_or_else(|_| "linux".to_string());
        builder.env("TERM", term);

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|err| RunError::Spawn {
                command: line.to_string(),
                reason: err.to_string(),
            })?;
        // The slave end belongs to the child now; holding it open here would
        // keep the reader from seeing EOF.
        drop(pair.slave);

        let pid = child.process_id();
        Ok(Self {
            master: Some(pair.master),
            child,
            pid,
            command: line.to_string(),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Starts the reader thread pumping master-side output into the event
    /// channel. Chunks arrive in read order; the thread ends at EOF.
    pub fn start_pump(&mut self, id: usize, tx: UnboundedSender<Event>) -> Result<(), RunError> {
        let master = self.master.as_ref().ok_or_else(|| RunError::Spawn {
            command: self.command.clone(),
            reason: "pty already closed".to_string(),
        })?;
        let mut reader = master.try_clone_reader().map_err(|err| RunError::Spawn {
            command: self.command.clone(),
            reason: err.to_string(),
        })?;

        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = Event::CommandOutput {
                            id,
                            bytes: buf[..n].to_vec(),
                        };
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        // On Linux the master read fails with EIO once the
                        // child side closes; treat it as EOF.
                        log::debug!("pty reader for command {id} stopped: {err}");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    /// Reaps the child if it has exited. Returns its exit code.
    pub fn try_wait(&mut self) -> Option<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(Some(status.exit_code() as i32)),
            Ok(None) => None,
            Err(err) => {
                log::warn!("waiting on {} failed: {err}", self.command);
                Some(None)
            }
        }
    }

    /// Asks the command to stop: SIGTERM to the child's process group (the
    /// shell and whatever it started) and to the child itself.
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            let pid = pid as libc::pid_t;
            unsafe {
                libc::kill(-pid, libc::SIGTERM);
                libc::kill(pid, libc::SIGTERM);
            }
            return;
        }
        #[allow(unreachable_code)]
        self.force_kill();
    }

    /// Kills the child outright. Used when the grace period after
    /// `terminate` expires.
    pub fn force_kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
        if let Err(err) = self.child.kill() {
            log::debug!("kill {} failed: {err}", self.command);
        }
    }

    /// Final teardown: closes the master so the reader thread sees EOF.
    pub fn shutdown(&mut self) {
        self.master.take();
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
