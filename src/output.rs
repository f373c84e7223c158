//! Plain-text output retention for the end-of-run summary.
//!
//! Each runner keeps a small rolling tail of its output as sanitized lines.
//! The panes render from the terminal screen model instead; this buffer only
//! feeds the printed summary (and plain mode), so completed lines are stored
//! with escapes stripped and carriage-return rewrites collapsed.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// A fixed-capacity ring of sanitized output lines, oldest evicted first.
///
/// `feed` accumulates partial lines across chunk boundaries and returns the
/// lines completed by the chunk, which plain mode prints as they form.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
    partial: String,
}

impl TailBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(64)),
            partial: String::new(),
        }
    }

    /// Feeds a raw chunk of pty output; returns the newly completed lines.
    /// The partial line keeps its raw carriage returns and escapes; both are
    /// resolved when the line completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(bytes);
        let mut completed = Vec::new();
        for ch in text.chars() {
            match ch {
                '\n' => {
                    let line = finish_line(&std::mem::take(&mut self.partial));
                    self.push(line.clone());
                    completed.push(line);
                }
                _ => self.partial.push(ch),
            }
        }
        completed
    }

    fn push(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Flushes any unterminated final line into the ring and returns it, so
    /// plain mode can still print a command's last unfinished line.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = finish_line(&std::mem::take(&mut self.partial));
        self.push(line.clone());
        Some(line)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }
}

/// Strips ANSI escapes and replaces invalid UTF-8.
pub fn sanitize_bytes(bytes: &[u8]) -> String {
    let stripped = strip(bytes);
    String::from_utf8_lossy(&stripped).to_string()
}

// A bare \r rewrites the line from the start; keep the last segment, then
// strip escapes. Stripping first would also remove the \r boundaries and
// glue every segment together.
fn finish_line(line: &str) -> String {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let last = line.rsplit('\r').next().unwrap_or("");
    sanitize_bytes(last.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_drops_oldest() {
        let mut tail = TailBuffer::new(2);
        tail.feed(b"a\nb\nc\n");
        let lines = tail.iter().cloned().collect::<Vec<_>>();
        assert_eq!(lines, vec!["b", "c"]);
    }

    #[test]
    fn feed_returns_completed_lines_across_chunks() {
        let mut tail = TailBuffer::new(8);
        assert!(tail.feed(b"par").is_empty());
        assert_eq!(tail.feed(b"tial\nnext"), vec!["partial"]);
        assert_eq!(tail.finish(), Some("next".to_string()));
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn finish_resolves_cr_rewrites_in_the_partial_line() {
        let mut tail = TailBuffer::new(8);
        assert!(tail.feed(b"\x1b[32m10%\r100%").is_empty());
        assert_eq!(tail.finish(), Some("100%".to_string()));
        assert_eq!(tail.finish(), None);
    }

    #[test]
    fn feed_strips_escapes_and_keeps_last_cr_segment() {
        let mut tail = TailBuffer::new(8);
        let lines = tail.feed(b"\x1b[31m10%\r50%\r100%\x1b[0m\n");
        assert_eq!(lines, vec!["100%"]);
    }

    #[test]
    fn crlf_is_one_line_break() {
        let mut tail = TailBuffer::new(8);
        assert_eq!(tail.feed(b"done\r\n"), vec!["done"]);
    }
}
