use regex::Regex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::OnceLock;

use super::screen::{EraseMode, Screen};

const ESC: char = '\x1b';
const BEL: char = '\x07';
const BACKSPACE: char = '\x08';

/// Largest row, column or count a CSI parameter may carry, the `winsize` range.
const MAX_PARAM: usize = u16::MAX as usize;

/// `ESC [` params letter. Params may carry a leading `?` private marker.
fn csi_regex() -> &'static Regex {
    static CSI: OnceLock<Regex> = OnceLock::new();
    CSI.get_or_init(|| {
        Regex::new(r"^\x1b\[(\??[0-9]*(?:;[0-9]+)*)([A-Za-z])").expect("valid CSI pattern")
    })
}

/// Line-oriented ANSI interpreter that rebuilds a shell's visible text.
///
/// Only cursor motion, erasing, absolute positioning, and the alternate
/// screen are modeled. Other CSI, OSC, and charset sequences are swallowed.
/// An escape that matches none of these is not an error: the ESC byte is
/// dropped and the bytes after it are printed like ordinary text.
pub struct ScreenEmulator {
    screen: Screen,
    log: DiagnosticLog,
}

/// A rendered snapshot together with the diagnostic log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenState {
    pub text: String,
    pub log: String,
}

impl Default for ScreenEmulator {
    fn default() -> Self {
        Self::new(DiagnosticLog::DEFAULT_LIMIT)
    }
}

impl ScreenEmulator {
    /// `log_limit` caps retained diagnostic lines; 0 turns the log off.
    pub fn new(log_limit: usize) -> Self {
        Self {
            screen: Screen::new(),
            log: DiagnosticLog::new(log_limit),
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Feed text containing newlines; every segment is one `process_line` call.
    pub fn process_text(&mut self, text: &str) {
        for line in text.split('\n') {
            self.process_line(line);
        }
    }

    /// Interpret one line of shell output with its newline already stripped.
    ///
    /// Outside the alternate screen the stripped newline is reconstructed
    /// as a line advance once the whole line is consumed.
    pub fn process_line(&mut self, line: &str) {
        let mut trace = Trace::new(self.log.enabled());
        let mut i = 0;

        while let Some(ch) = line[i..].chars().next() {
            match ch {
                ESC => {
                    if let Some(consumed) = self.escape(&line[i..], &mut trace) {
                        i += consumed;
                        continue;
                    }
                }
                '\r' => self.screen.carriage_return(),
                BACKSPACE => self.screen.backspace(),
                _ => {
                    let token = if self.screen.put(ch) {
                        Token::Append(ch)
                    } else {
                        Token::Overwrite(ch)
                    };
                    trace.push(token);
                }
            }
            i += ch.len_utf8();
        }

        if !self.screen.is_alternate() {
            self.screen.line_advance();
            trace.push(Token::LineAdvance);
        }
        self.log.push(trace.finish());
    }

    /// Try to consume an escape sequence at the start of `rest`.
    /// Returns the byte length consumed, or None when nothing matched.
    fn escape(&mut self, rest: &str, trace: &mut Trace) -> Option<usize> {
        match rest.as_bytes().get(1) {
            Some(b'[') => {
                let caps = csi_regex().captures(rest)?;
                let whole = caps.get(0)?;
                let command = caps[2].chars().next()?;
                self.dispatch_csi(&caps[1], command, trace);
                Some(whole.len())
            }
            Some(b'(') | Some(b')') => {
                let designator = rest[2..].chars().next()?;
                trace.push(Token::Charset);
                Some(2 + designator.len_utf8())
            }
            Some(b']') => {
                trace.push(Token::Osc);
                // unterminated OSC swallows the rest of the line
                Some(rest.find(BEL).map_or(rest.len(), |end| end + 1))
            }
            _ => None,
        }
    }

    fn dispatch_csi(&mut self, params: &str, command: char, trace: &mut Trace) {
        trace.push(Token::Csi);

        if let Some(private) = params.strip_prefix('?') {
            match (private, command) {
                ("1049", 'h') => {
                    self.screen.enter_alternate();
                    trace.push(Token::AlternateOn);
                }
                ("1049", 'l') => {
                    self.screen.exit_alternate();
                    trace.push(Token::AlternateOff);
                }
                _ => {}
            }
            return;
        }

        let args: Vec<Option<usize>> = params.split(';').map(parse_param).collect();
        let first = args.first().copied().flatten();
        let count = first.unwrap_or(1);

        match command {
            'H' => {
                let row = first.unwrap_or(1).saturating_sub(1);
                let col = args.get(1).copied().flatten().unwrap_or(1).saturating_sub(1);
                let grown = self.screen.move_to(row, col);
                trace.push(Token::Goto { row, col, grown });
            }
            'J' => {
                if let Some(mode) = EraseMode::from_param(first) {
                    self.screen.erase_display(mode);
                    trace.push(Token::EraseDisplay(mode));
                }
            }
            'K' => {
                if let Some(mode) = EraseMode::from_param(first) {
                    self.screen.erase_line(mode);
                    trace.push(Token::EraseLine(mode));
                }
            }
            'A' => {
                self.screen.move_up(count);
                trace.push(Token::Up {
                    n: count,
                    row: self.screen.cursor.row,
                    rows: self.screen.rows().len(),
                });
            }
            'B' => self.screen.move_down(count),
            'C' => self.screen.move_right(count),
            'D' => self.screen.move_left(count),
            // SGR and everything else: consumed, no effect
            _ => {}
        }
    }

    /// Trim trailing empty rows (this sticks), then render.
    pub fn screen_state(&mut self) -> ScreenState {
        self.screen.trim_trailing_empty();
        ScreenState {
            text: self.screen.render(),
            log: self.log.render(),
        }
    }
}

/// Digits only; anything past `MAX_PARAM`, overflow included, saturates.
fn parse_param(param: &str) -> Option<usize> {
    if param.is_empty() {
        return None;
    }
    let value = param.parse::<usize>().unwrap_or(usize::MAX);
    Some(value.min(MAX_PARAM))
}

/// Bounded record of what the interpreter recognized, one entry per line.
pub struct DiagnosticLog {
    lines: VecDeque<String>,
    limit: usize,
}

impl DiagnosticLog {
    pub const DEFAULT_LIMIT: usize = 10_000;

    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            limit,
        }
    }

    pub fn enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn push(&mut self, line: String) {
        if !self.enabled() {
            return;
        }
        if self.lines.len() == self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

#[derive(Debug)]
enum Token {
    Csi,
    AlternateOn,
    AlternateOff,
    Goto { row: usize, col: usize, grown: usize },
    EraseDisplay(EraseMode),
    EraseLine(EraseMode),
    Up { n: usize, row: usize, rows: usize },
    Charset,
    Osc,
    Append(char),
    Overwrite(char),
    LineAdvance,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Csi => write!(f, "<csi>"),
            Token::AlternateOn => write!(f, "<alt-screen on>"),
            Token::AlternateOff => write!(f, "<alt-screen off>"),
            Token::Goto { row, col, grown } => write!(f, "<goto {row},{col} +{grown}>"),
            Token::EraseDisplay(mode) => write!(f, "<erase-display {mode:?}>"),
            Token::EraseLine(mode) => write!(f, "<erase-line {mode:?}>"),
            Token::Up { n, row, rows } => write!(f, "<up {n} {row}/{rows}>"),
            Token::Charset => write!(f, "<scs>"),
            Token::Osc => write!(f, "<osc>"),
            Token::Append(ch) => write!(f, "<put {ch:?}>"),
            Token::Overwrite(ch) => write!(f, "<overwrite {ch:?}>"),
            Token::LineAdvance => write!(f, "<newline>"),
        }
    }
}

/// Per-line token buffer; a no-op when the log is disabled.
struct Trace {
    out: Option<String>,
}

impl Trace {
    fn new(enabled: bool) -> Self {
        Self {
            out: enabled.then(String::new),
        }
    }

    fn push(&mut self, token: Token) {
        if let Some(out) = self.out.as_mut() {
            use std::fmt::Write;
            let _ = write!(out, "{token}");
        }
    }

    fn finish(self) -> String {
        self.out.unwrap_or_default()
    }
}
