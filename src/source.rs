//! Task sources: where the commands of a run come from.
//!
//! A run either executes a fixed list of command lines, or builds one command
//! per stdin line from a template (xargs mode). The xargs source is lazy and
//! never blocks its caller: a dedicated thread does the blocking stdin reads
//! (like the pty reader threads) and hands values over a rendezvous channel,
//! so an unbounded or stalled producer upstream never freezes the
//! coordination loop and input is not materialized ahead of demand.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::mpsc::{sync_channel, Receiver, TryRecvError};

use crate::command::Command;

/// Outcome of pulling from a source.
pub enum NextCommand {
    Ready(Command),
    /// Nothing available right now (input still in flight); try again on the
    /// next tick.
    Pending,
    Exhausted,
}

pub enum TaskSource {
    Static {
        commands: VecDeque<Command>,
    },
    Xargs {
        template: String,
        token: String,
        values: Receiver<String>,
        next_index: usize,
        done: bool,
    },
}

impl TaskSource {
    pub fn fixed(lines: Vec<String>) -> Self {
        let commands = lines
            .into_iter()
            .enumerate()
            .map(|(index, line)| Command::new(line, index))
            .collect();
        TaskSource::Static { commands }
    }

    pub fn xargs(template: String, token: String) -> Self {
        Self::xargs_from(template, token, Box::new(std::io::BufReader::new(std::io::stdin())))
    }

    /// Spawns the input reader thread. The channel holds a single value, so
    /// the thread reads at most one line ahead of the scheduler's demand.
    pub fn xargs_from(template: String, token: String, reader: Box<dyn BufRead + Send>) -> Self {
        let (tx, rx) = sync_channel(1);
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let value = line.trim_end_matches(['\n', '\r']);
                        if value.trim().is_empty() {
                            continue;
                        }
                        if tx.send(value.to_string()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("reading stdin failed: {err}");
                        break;
                    }
                }
            }
        });
        TaskSource::Xargs {
            template,
            token,
            values: rx,
            next_index: 0,
            done: false,
        }
    }

    /// The total number of commands, when it is known up front.
    pub fn known_len(&self) -> Option<usize> {
        match self {
            TaskSource::Static { commands } => Some(commands.len()),
            TaskSource::Xargs { .. } => None,
        }
    }

    /// Pulls the next command without blocking. `Pending` means the input
    /// thread has not produced a value yet; the caller retries on its next
    /// tick.
    pub fn next_command(&mut self) -> NextCommand {
        match self {
            TaskSource::Static { commands } => match commands.pop_front() {
                Some(command) => NextCommand::Ready(command),
                None => NextCommand::Exhausted,
            },
            TaskSource::Xargs {
                template,
                token,
                values,
                next_index,
                done,
            } => {
                if *done {
                    return NextCommand::Exhausted;
                }
                match values.try_recv() {
                    Ok(value) => {
                        let index = *next_index;
                        *next_index += 1;
                        NextCommand::Ready(Command::new(substitute(template, token, &value), index))
                    }
                    Err(TryRecvError::Empty) => NextCommand::Pending,
                    Err(TryRecvError::Disconnected) => {
                        *done = true;
                        NextCommand::Exhausted
                    }
                }
            }
        }
    }

    /// Removes and returns every command that is already known but not yet
    /// dispatched. Used on cancellation; a lazy source stops being read and
    /// yields only what its thread had buffered.
    pub fn drain(&mut self) -> Vec<Command> {
        match self {
            TaskSource::Static { commands } => commands.drain(..).collect(),
            TaskSource::Xargs {
                template,
                token,
                values,
                next_index,
                done,
            } => {
                *done = true;
                let mut known = Vec::new();
                while let Ok(value) = values.try_recv() {
                    let index = *next_index;
                    *next_index += 1;
                    known.push(Command::new(substitute(template, token, &value), index));
                }
                known
            }
        }
    }
}

/// Builds a concrete command line from the xargs template and one input value.
/// If the template contains the replace token, every occurrence is replaced
/// verbatim; otherwise the value is appended as a single shell-quoted word.
fn substitute(template: &str, token: &str, value: &str) -> String {
    if template.contains(token) {
        template.replace(token, value)
    } else {
        format!("{template} {}", shell_words::quote(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::time::{Duration, Instant};

    fn xargs_source(template: &str, input: &str) -> TaskSource {
        TaskSource::xargs_from(
            template.to_string(),
            "{}".to_string(),
            Box::new(Cursor::new(input.to_string())),
        )
    }

    /// Retries `Pending` until the reader thread catches up.
    fn pull(source: &mut TaskSource) -> Option<Command> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match source.next_command() {
                NextCommand::Ready(command) => return Some(command),
                NextCommand::Exhausted => return None,
                NextCommand::Pending => {
                    assert!(Instant::now() < deadline, "source stuck in Pending");
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    #[test]
    fn static_source_yields_in_order() {
        let mut source = TaskSource::fixed(vec!["a".into(), "b".into()]);
        assert_eq!(source.known_len(), Some(2));
        assert_eq!(pull(&mut source).unwrap().line, "a");
        assert_eq!(pull(&mut source).unwrap().line, "b");
        assert!(pull(&mut source).is_none());
    }

    #[test]
    fn xargs_replaces_every_token_occurrence() {
        let mut source = xargs_source("cp {} {}.bak", "data.txt\n");
        assert_eq!(pull(&mut source).unwrap().line, "cp data.txt data.txt.bak");
    }

    #[test]
    fn xargs_appends_quoted_when_no_token() {
        let mut source = xargs_source("wc -l", "my file.txt\n");
        assert_eq!(pull(&mut source).unwrap().line, "wc -l 'my file.txt'");
    }

    #[test]
    fn xargs_skips_blank_lines_and_strips_crlf() {
        let mut source = xargs_source("echo {}", "one\r\n\n  \ntwo\n");
        assert_eq!(pull(&mut source).unwrap().line, "echo one");
        assert_eq!(pull(&mut source).unwrap().line, "echo two");
        assert!(pull(&mut source).is_none());
        assert!(source.known_len().is_none());
    }

    #[test]
    fn xargs_indices_count_only_nonblank_input() {
        let mut source = xargs_source("echo {}", "a\n\nb\n");
        assert_eq!(pull(&mut source).unwrap().index, 0);
        assert_eq!(pull(&mut source).unwrap().index, 1);
    }

    #[test]
    fn drain_empties_static_source() {
        let mut source = TaskSource::fixed(vec!["a".into(), "b".into(), "c".into()]);
        let _ = pull(&mut source);
        let rest = source.drain();
        assert_eq!(rest.len(), 2);
        assert!(pull(&mut source).is_none());
    }

    #[test]
    fn drain_stops_lazy_source() {
        let mut source = xargs_source("echo {}", "a\nb\nc\n");
        let _ = pull(&mut source);
        // At most the single buffered value is known; unread input is never
        // materialized.
        assert!(source.drain().len() <= 1);
        assert!(pull(&mut source).is_none());
    }

    struct StallingReader {
        yielded: bool,
    }

    impl Read for StallingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.yielded {
                return Ok(0);
            }
            std::thread::sleep(Duration::from_millis(400));
            self.yielded = true;
            let bytes = b"hello\n";
            buf[..bytes.len()].copy_from_slice(bytes);
            Ok(bytes.len())
        }
    }

    #[test]
    fn stalled_input_does_not_block_the_puller() {
        let started = Instant::now();
        let mut source = TaskSource::xargs_from(
            "echo {}".to_string(),
            "{}".to_string(),
            Box::new(std::io::BufReader::new(StallingReader { yielded: false })),
        );
        // The stall happens on the reader thread; pulling returns right away.
        assert!(matches!(source.next_command(), NextCommand::Pending));
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(pull(&mut source).unwrap().line, "echo hello");
        assert!(pull(&mut source).is_none());
    }
}
