//! Per-pane terminal screen model.
//!
//! Each runner owns a `PaneScreen`: a fixed-size cell grid fed with the raw
//! bytes its pty produces. A small tagged parser splits the stream into
//! printable text, a recognized control subset, and unsupported sequences
//! (which are consumed and dropped so they can never corrupt a neighboring
//! pane). Sequences and multi-byte characters split across chunk reads are
//! buffered until complete.
//!
//! Supported controls: LF, CR, BS, TAB, CSI cursor moves (A/B/C/D/H), erase
//! in line (K: 0/1/2), erase in display (J: 2 only), and SGR (m). OSC
//! sequences are skipped. Everything else is best-effort dropped.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

// Malformed input (e.g. an OSC that never terminates) must not buffer forever.
const MAX_PENDING: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Cell {
    ch: char,
    style: Style,
}

impl Cell {
    fn blank() -> Self {
        Self {
            ch: ' ',
            style: Style::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Control {
    CursorUp(usize),
    CursorDown(usize),
    CursorForward(usize),
    CursorBack(usize),
    CursorPosition(usize, usize),
    EraseInLine(usize),
    EraseInDisplay(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Print(char),
    LineFeed,
    CarriageReturn,
    Backspace,
    Tab,
    Control(Control),
    Sgr(Vec<i32>),
}

enum Parsed {
    /// A recognized token and the bytes it consumed.
    Token(Token, usize),
    /// Bytes consumed with no effect (unsupported or malformed).
    Skip(usize),
    /// The buffer ends mid-sequence; wait for more bytes.
    Incomplete,
}

/// A bounded terminal grid with a cursor, scrolling, and per-cell styles.
#[derive(Debug, Clone)]
pub struct PaneScreen {
    cols: usize,
    rows: usize,
    cells: Vec<Cell>,
    cur_row: usize,
    cur_col: usize,
    sgr: SgrState,
    pending: Vec<u8>,
}

impl PaneScreen {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;
        Self {
            cols,
            rows,
            cells: vec![Cell::blank(); cols * rows],
            cur_row: 0,
            cur_col: 0,
            sgr: SgrState::default(),
            pending: Vec::new(),
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols as u16
    }

    pub fn rows(&self) -> u16 {
        self.rows as u16
    }

    /// Feeds raw pty bytes into the grid.
    pub fn feed(&mut self, bytes: &[u8]) {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);
        let mut i = 0;
        while i < buf.len() {
            match parse_token(&buf[i..]) {
                Parsed::Token(token, len) => {
                    self.apply(token);
                    i += len;
                }
                Parsed::Skip(len) => i += len.max(1),
                Parsed::Incomplete => break,
            }
        }
        self.pending = buf.split_off(i);
        if self.pending.len() > MAX_PENDING {
            log::debug!("dropping {} bytes of unterminated sequence", self.pending.len());
            self.pending.clear();
        }
    }

    fn apply(&mut self, token: Token) {
        match token {
            Token::Print(ch) => {
                if self.cur_col >= self.cols {
                    self.cur_col = 0;
                    self.line_feed();
                }
                let style = self.sgr.to_style();
                self.set_cell(self.cur_row, self.cur_col, Cell { ch, style });
                self.cur_col += 1;
            }
            Token::LineFeed => {
                self.cur_col = 0;
                self.line_feed();
            }
            Token::CarriageReturn => self.cur_col = 0,
            Token::Backspace => {
                // BS erases the previous cell, shell-prompt style.
                if self.cur_col > 0 {
                    self.cur_col -= 1;
                    self.set_cell(self.cur_row, self.cur_col, Cell::blank());
                }
            }
            Token::Tab => {
                let next = (self.cur_col / 8 + 1) * 8;
                self.cur_col = next.min(self.cols.saturating_sub(1));
            }
            Token::Control(control) => self.apply_control(control),
            Token::Sgr(values) => self.sgr.apply(&values),
        }
    }

    fn apply_control(&mut self, control: Control) {
        let max_row = self.rows - 1;
        let max_col = self.cols - 1;
        match control {
            Control::CursorUp(n) => self.cur_row = self.cur_row.saturating_sub(n),
            Control::CursorDown(n) => self.cur_row = (self.cur_row + n).min(max_row),
            Control::CursorForward(n) => self.cur_col = (self.cur_col + n).min(max_col),
            Control::CursorBack(n) => self.cur_col = self.cur_col.saturating_sub(n),
            Control::CursorPosition(row, col) => {
                self.cur_row = row.saturating_sub(1).min(max_row);
                self.cur_col = col.saturating_sub(1).min(max_col);
            }
            Control::EraseInLine(mode) => {
                let col = self.cur_col.min(max_col);
                let (from, to) = match mode {
                    0 => (col, max_col),
                    1 => (0, col),
                    2 => (0, max_col),
                    _ => return,
                };
                for c in from..=to {
                    self.set_cell(self.cur_row, c, Cell::blank());
                }
            }
            Control::EraseInDisplay(mode) => {
                // Only the full clear is supported, like the rest of the
                // allowlist; partial display erases are dropped.
                if mode == 2 {
                    self.cells.fill(Cell::blank());
                    self.cur_row = 0;
                    self.cur_col = 0;
                }
            }
        }
    }

    fn line_feed(&mut self) {
        if self.cur_row + 1 >= self.rows {
            self.scroll_up();
        } else {
            self.cur_row += 1;
        }
    }

    fn scroll_up(&mut self) {
        self.cells.copy_within(self.cols.., 0);
        let start = (self.rows - 1) * self.cols;
        self.cells[start..].fill(Cell::blank());
    }

    fn set_cell(&mut self, row: usize, col: usize, cell: Cell) {
        if row < self.rows && col < self.cols {
            self.cells[row * self.cols + col] = cell;
        }
    }

    /// Renders the grid as styled lines. Pure read: calling this repeatedly
    /// with no intervening `feed` yields identical output.
    pub fn snapshot(&self) -> Vec<Line<'static>> {
        let mut lines = Vec::with_capacity(self.rows);
        for row in 0..self.rows {
            let cells = &self.cells[row * self.cols..(row + 1) * self.cols];
            lines.push(render_row(cells));
        }
        lines
    }

    /// The grid rows as unstyled text with trailing blanks trimmed.
    #[cfg(test)]
    fn plain_rows(&self) -> Vec<String> {
        (0..self.rows)
            .map(|row| {
                let cells = &self.cells[row * self.cols..(row + 1) * self.cols];
                cells
                    .iter()
                    .map(|cell| cell.ch)
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect()
    }
}

fn render_row(cells: &[Cell]) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut run = String::new();
    let mut run_style = Style::default();

    // Trim trailing blank cells so panes don't paint useless whitespace.
    let end = cells
        .iter()
        .rposition(|cell| *cell != Cell::blank())
        .map(|pos| pos + 1)
        .unwrap_or(0);

    for cell in &cells[..end] {
        if cell.style != run_style && !run.is_empty() {
            spans.push(Span::styled(std::mem::take(&mut run), run_style));
        }
        run_style = cell.style;
        run.push(cell.ch);
    }
    if !run.is_empty() {
        spans.push(Span::styled(run, run_style));
    }
    Line::from(spans)
}

fn parse_token(buf: &[u8]) -> Parsed {
    match buf[0] {
        0x1b => parse_escape(buf),
        b'\n' => Parsed::Token(Token::LineFeed, 1),
        b'\r' => Parsed::Token(Token::CarriageReturn, 1),
        0x08 => Parsed::Token(Token::Backspace, 1),
        b'\t' => Parsed::Token(Token::Tab, 1),
        b if b < 0x20 || b == 0x7f => Parsed::Skip(1),
        _ => parse_printable(buf),
    }
}

fn parse_printable(buf: &[u8]) -> Parsed {
    let width = utf8_width(buf[0]);
    if width == 0 {
        // Invalid leading byte: drop it rather than render garbage.
        return Parsed::Skip(1);
    }
    if buf.len() < width {
        return Parsed::Incomplete;
    }
    match std::str::from_utf8(&buf[..width]) {
        Ok(text) => match text.chars().next() {
            Some(ch) => Parsed::Token(Token::Print(ch), width),
            None => Parsed::Skip(width),
        },
        Err(_) => Parsed::Skip(1),
    }
}

fn utf8_width(byte: u8) -> usize {
    match byte {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 0,
    }
}

fn parse_escape(buf: &[u8]) -> Parsed {
    let Some(&kind) = buf.get(1) else {
        return Parsed::Incomplete;
    };
    match kind {
        b'[' => parse_csi(buf),
        b']' => parse_osc(buf),
        // Charset designations carry one more byte.
        b'(' | b')' | b'#' | b'%' => {
            if buf.len() < 3 {
                Parsed::Incomplete
            } else {
                Parsed::Skip(3)
            }
        }
        // Two-byte escapes (RIS, keypad modes, ...): not supported.
        _ => Parsed::Skip(2),
    }
}

fn parse_csi(buf: &[u8]) -> Parsed {
    let mut private = false;
    let mut params = Vec::new();
    let mut i = 2;
    loop {
        let Some(&byte) = buf.get(i) else {
            return Parsed::Incomplete;
        };
        match byte {
            0x40..=0x7e => {
                let len = i + 1;
                if private {
                    // DEC private modes (e.g. cursor visibility) are dropped.
                    return Parsed::Skip(len);
                }
                return csi_token(byte, &params, len);
            }
            0x30..=0x3b => params.push(byte),
            0x3c..=0x3f => private = true,
            0x20..=0x2f => {} // intermediates: tolerated, sequence ends at final
            _ => return Parsed::Skip(i + 1),
        }
        i += 1;
    }
}

fn csi_token(final_byte: u8, params: &[u8], len: usize) -> Parsed {
    let values = parse_params(params);
    let arg = |idx: usize, default: usize| -> usize {
        values
            .get(idx)
            .copied()
            .filter(|&v| v > 0)
            .map(|v| v as usize)
            .unwrap_or(default)
    };
    let control = match final_byte {
        b'A' => Control::CursorUp(arg(0, 1)),
        b'B' => Control::CursorDown(arg(0, 1)),
        b'C' => Control::CursorForward(arg(0, 1)),
        b'D' => Control::CursorBack(arg(0, 1)),
        b'H' | b'f' => Control::CursorPosition(arg(0, 1), arg(1, 1)),
        b'K' => Control::EraseInLine(values.first().copied().unwrap_or(0).max(0) as usize),
        b'J' => Control::EraseInDisplay(values.first().copied().unwrap_or(0).max(0) as usize),
        b'm' => {
            let mut sgr = values;
            if sgr.is_empty() {
                sgr.push(0);
            }
            return Parsed::Token(Token::Sgr(sgr), len);
        }
        _ => return Parsed::Skip(len),
    };
    Parsed::Token(Token::Control(control), len)
}

fn parse_params(params: &[u8]) -> Vec<i32> {
    let mut values = Vec::new();
    let mut current: Option<i32> = None;
    for &byte in params {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as i32;
                current = Some(current.unwrap_or(0).saturating_mul(10) + digit);
            }
            b';' => {
                values.push(current.take().unwrap_or(0));
            }
            _ => {}
        }
    }
    if let Some(value) = current {
        values.push(value);
    } else if !params.is_empty() && params.last() == Some(&b';') {
        values.push(0);
    }
    values
}

fn parse_osc(buf: &[u8]) -> Parsed {
    // OSC terminates with BEL or ST (ESC \).
    let mut i = 2;
    while i < buf.len() {
        match buf[i] {
            0x07 => return Parsed::Skip(i + 1),
            0x1b => {
                return match buf.get(i + 1) {
                    Some(b'\\') => Parsed::Skip(i + 2),
                    Some(_) => Parsed::Skip(i + 1),
                    None => Parsed::Incomplete,
                };
            }
            _ => i += 1,
        }
    }
    Parsed::Incomplete
}

#[derive(Debug, Clone, Default)]
struct SgrState {
    fg: Option<Color>,
    bg: Option<Color>,
    modifiers: Modifier,
}

impl SgrState {
    fn to_style(&self) -> Style {
        let mut style = Style::default();
        if let Some(color) = self.fg {
            style = style.fg(color);
        }
        if let Some(color) = self.bg {
            style = style.bg(color);
        }
        if !self.modifiers.is_empty() {
            style = style.add_modifier(self.modifiers);
        }
        style
    }

    fn apply(&mut self, values: &[i32]) {
        let mut i = 0;
        while i < values.len() {
            match values[i] {
                0 => *self = SgrState::default(),
                1 => self.modifiers = self.modifiers.union(Modifier::BOLD),
                2 => self.modifiers = self.modifiers.union(Modifier::DIM),
                3 => self.modifiers = self.modifiers.union(Modifier::ITALIC),
                4 => self.modifiers = self.modifiers.union(Modifier::UNDERLINED),
                7 => self.modifiers = self.modifiers.union(Modifier::REVERSED),
                22 => {
                    self.modifiers = self.modifiers.difference(Modifier::BOLD | Modifier::DIM)
                }
                23 => self.modifiers = self.modifiers.difference(Modifier::ITALIC),
                24 => self.modifiers = self.modifiers.difference(Modifier::UNDERLINED),
                27 => self.modifiers = self.modifiers.difference(Modifier::REVERSED),
                30..=37 => self.fg = basic_color(values[i] - 30, false),
                90..=97 => self.fg = basic_color(values[i] - 90, true),
                40..=47 => self.bg = basic_color(values[i] - 40, false),
                100..=107 => self.bg = basic_color(values[i] - 100, true),
                39 => self.fg = None,
                49 => self.bg = None,
                38 | 48 => {
                    let is_fg = values[i] == 38;
                    if let Some((advance, color)) = parse_extended_color(&values[i + 1..]) {
                        if is_fg {
                            self.fg = Some(color);
                        } else {
                            self.bg = Some(color);
                        }
                        i += advance;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

fn parse_extended_color(values: &[i32]) -> Option<(usize, Color)> {
    match values.first()? {
        5 => {
            let index = u8::try_from(*values.get(1)?).ok()?;
            Some((2, Color::Indexed(index)))
        }
        2 => {
            let r = u8::try_from(*values.get(1)?).ok()?;
            let g = u8::try_from(*values.get(2)?).ok()?;
            let b = u8::try_from(*values.get(3)?).ok()?;
            Some((4, Color::Rgb(r, g, b)))
        }
        _ => None,
    }
}

fn basic_color(index: i32, bright: bool) -> Option<Color> {
    let color = match (index, bright) {
        (0, false) => Color::Black,
        (1, false) => Color::Red,
        (2, false) => Color::Green,
        (3, false) => Color::Yellow,
        (4, false) => Color::Blue,
        (5, false) => Color::Magenta,
        (6, false) => Color::Cyan,
        (7, false) => Color::Gray,
        (0, true) => Color::DarkGray,
        (1, true) => Color::LightRed,
        (2, true) => Color::LightGreen,
        (3, true) => Color::LightYellow,
        (4, true) => Color::LightBlue,
        (5, true) => Color::LightMagenta,
        (6, true) => Color::LightCyan,
        (7, true) => Color::White,
        _ => return None,
    };
    Some(color)
}
