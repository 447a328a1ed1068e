/// One row of the virtual screen. Cells beyond the written content are
/// simply absent; gaps are padded with spaces when the row grows.
pub type Row = Vec<char>;

/// Zero-based cursor position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
}

/// Which part of the screen or line an erase sequence targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EraseMode {
    /// From the cursor to the end (param 0 or omitted).
    ToEnd,
    /// From the start through the cursor (param 1).
    ToStart,
    /// Everything (param 2).
    All,
}

impl EraseMode {
    pub fn from_param(param: Option<usize>) -> Option<Self> {
        match param.unwrap_or(0) {
            0 => Some(EraseMode::ToEnd),
            1 => Some(EraseMode::ToStart),
            2 => Some(EraseMode::All),
            _ => None,
        }
    }
}

/// Growable character grid with a cursor and an alternate-screen slot.
///
/// The grid only grows on writes and absolute positioning; it shrinks
/// solely through erase operations and [`Screen::trim_trailing_empty`].
/// There is always at least one row.
#[derive(Clone, Debug)]
pub struct Screen {
    rows: Vec<Row>,
    pub cursor: Cursor,
    alternate: bool,
    saved: Option<Vec<Row>>,
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

impl Screen {
    pub fn new() -> Self {
        Self {
            rows: blank(),
            cursor: Cursor::default(),
            alternate: false,
            saved: None,
        }
    }

    /// Build a screen from text rows, cursor parked after the last character.
    pub fn from_lines(lines: &[&str]) -> Self {
        let mut rows: Vec<Row> = lines.iter().map(|l| l.chars().collect()).collect();
        if rows.is_empty() {
            rows = blank();
        }
        let mut screen = Self {
            rows,
            ..Self::new()
        };
        screen.park_cursor_at_end();
        screen
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Row contents as strings, untrimmed.
    pub fn lines(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.iter().collect()).collect()
    }

    pub fn is_alternate(&self) -> bool {
        self.alternate
    }

    /// Grow the grid so that `(row, col)` is addressable.
    /// Returns how many rows had to be appended.
    pub fn ensure_cell(&mut self, row: usize, col: usize) -> usize {
        let grown = self.ensure_row(row);
        let line = &mut self.rows[row];
        if line.len() <= col {
            line.resize(col + 1, ' ');
        }
        grown
    }

    fn ensure_row(&mut self, row: usize) -> usize {
        let before = self.rows.len();
        if before <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        self.rows.len() - before
    }

    fn current_row_len(&self) -> usize {
        self.rows.get(self.cursor.row).map_or(0, Vec::len)
    }

    /// Write `ch` at the cursor and advance one column.
    /// Returns true when the cell was freshly appended rather than overwritten.
    pub fn put(&mut self, ch: char) -> bool {
        let Cursor { row, col } = self.cursor;
        let appended = col >= self.current_row_len() || row >= self.rows.len();
        self.ensure_cell(row, col);
        self.rows[row][col] = ch;
        self.cursor.col += 1;
        appended
    }

    /// Absolute positioning. Grows instead of clamping.
    pub fn move_to(&mut self, row: usize, col: usize) -> usize {
        self.cursor = Cursor { row, col };
        self.ensure_cell(row, col)
    }

    pub fn move_up(&mut self, n: usize) {
        self.cursor.row = self.cursor.row.saturating_sub(n);
    }

    pub fn move_down(&mut self, n: usize) {
        let last = self.rows.len() - 1;
        self.cursor.row = self.cursor.row.saturating_add(n).min(last);
    }

    pub fn move_right(&mut self, n: usize) {
        let len = self.current_row_len();
        self.cursor.col = self.cursor.col.saturating_add(n).min(len);
    }

    pub fn move_left(&mut self, n: usize) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
    }

    pub fn backspace(&mut self) {
        self.cursor.col = self.cursor.col.saturating_sub(1);
    }

    /// Implicit newline: fresh row appended, cursor to its start.
    pub fn line_advance(&mut self) {
        self.cursor.row += 1;
        self.cursor.col = 0;
        self.rows.push(Vec::new());
    }

    /// `CSI n J`. `ToStart` blanks the cursor column inclusively.
    pub fn erase_display(&mut self, mode: EraseMode) {
        let Cursor { row, col } = self.cursor;
        match mode {
            EraseMode::ToEnd => {
                self.ensure_row(row);
                self.rows[row].truncate(col);
                self.rows.truncate(row + 1);
            }
            EraseMode::ToStart => {
                self.ensure_row(row);
                for line in &mut self.rows[..row] {
                    line.clear();
                }
                blank_through(&mut self.rows[row], col);
            }
            EraseMode::All => {
                self.rows = blank();
                self.cursor = Cursor::default();
            }
        }
    }

    /// `CSI n K`, applied to the cursor's row.
    pub fn erase_line(&mut self, mode: EraseMode) {
        let Cursor { row, col } = self.cursor;
        self.ensure_row(row);
        let line = &mut self.rows[row];
        match mode {
            EraseMode::ToEnd => line.truncate(col),
            EraseMode::ToStart => blank_through(line, col),
            EraseMode::All => line.clear(),
        }
    }

    /// Swap in a fresh buffer for a full-screen program.
    ///
    /// Re-entering while already alternate only resets the alternate
    /// buffer; the primary screen saved on first entry is kept.
    pub fn enter_alternate(&mut self) {
        let primary = std::mem::replace(&mut self.rows, blank());
        if !self.alternate {
            self.saved = Some(primary);
        }
        self.cursor = Cursor::default();
        self.alternate = true;
    }

    /// Restore the saved primary screen and park the cursor after its last character.
    pub fn exit_alternate(&mut self) {
        self.rows = self.saved.take().unwrap_or_else(blank);
        self.alternate = false;
        self.park_cursor_at_end();
    }

    fn park_cursor_at_end(&mut self) {
        let row = self.rows.len() - 1;
        self.cursor = Cursor {
            row,
            col: self.rows[row].len(),
        };
    }

    /// Drop trailing zero-length rows, always leaving at least one row.
    pub fn trim_trailing_empty(&mut self) {
        while self.rows.len() > 1 && self.rows.last().is_some_and(Vec::is_empty) {
            self.rows.pop();
        }
    }

    /// Rows right-trimmed of spaces and joined with newlines.
    pub fn render(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                let line: String = row.iter().collect();
                line.trim_end_matches(' ').to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn blank() -> Vec<Row> {
    vec![Vec::new()]
}

fn blank_through(line: &mut Row, col: usize) {
    for cell in line.iter_mut().take(col.saturating_add(1)) {
        *cell = ' ';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_screen_has_one_row() {
        let screen = Screen::new();
        assert_eq!(screen.rows().len(), 1);
        assert_eq!(screen.cursor, Cursor::default());
        assert_eq!(screen.render(), "");
    }

    #[test]
    fn test_put_pads_with_spaces() {
        let mut screen = Screen::new();
        screen.cursor = Cursor { row: 2, col: 3 };
        assert!(screen.put('x'));
        assert_eq!(screen.lines(), vec!["", "", "   x"]);
        assert_eq!(screen.cursor, Cursor { row: 2, col: 4 });
    }

    #[test]
    fn test_put_overwrites() {
        let mut screen = Screen::from_lines(&["abc"]);
        screen.cursor.col = 1;
        assert!(!screen.put('X'));
        assert_eq!(screen.lines(), vec!["aXc"]);
    }

    #[test]
    fn test_move_to_grows_grid() {
        let mut screen = Screen::new();
        assert_eq!(screen.move_to(5, 10), 5);
        assert_eq!(screen.rows().len(), 6);
        assert_eq!(screen.rows()[5], vec![' '; 11]);
    }

    #[test]
    fn test_relative_moves_clamp() {
        let mut screen = Screen::from_lines(&["hello", "hi"]);
        screen.move_up(10);
        assert_eq!(screen.cursor.row, 0);
        screen.move_down(10);
        assert_eq!(screen.cursor.row, 1);
        screen.move_right(10);
        assert_eq!(screen.cursor.col, 2);
        screen.move_left(10);
        assert_eq!(screen.cursor.col, 0);
        screen.backspace();
        assert_eq!(screen.cursor.col, 0);
    }

    #[test]
    fn test_erase_line_modes() {
        let mut screen = Screen::from_lines(&["abcdef"]);
        screen.cursor.col = 3;
        screen.erase_line(EraseMode::ToEnd);
        assert_eq!(screen.lines(), vec!["abc"]);

        let mut screen = Screen::from_lines(&["abcdef"]);
        screen.cursor.col = 3;
        screen.erase_line(EraseMode::ToStart);
        // cursor column itself is blanked too
        assert_eq!(screen.lines(), vec!["    ef"]);

        let mut screen = Screen::from_lines(&["abcdef"]);
        screen.erase_line(EraseMode::All);
        assert_eq!(screen.lines(), vec![""]);
    }

    #[test]
    fn test_erase_display_to_end() {
        let mut screen = Screen::from_lines(&["one", "two", "three"]);
        screen.cursor = Cursor { row: 1, col: 1 };
        screen.erase_display(EraseMode::ToEnd);
        assert_eq!(screen.lines(), vec!["one", "t"]);
    }

    #[test]
    fn test_erase_display_to_start() {
        let mut screen = Screen::from_lines(&["one", "two", "three"]);
        screen.cursor = Cursor { row: 2, col: 1 };
        screen.erase_display(EraseMode::ToStart);
        assert_eq!(screen.lines(), vec!["", "", "  ree"]);
    }

    #[test]
    fn test_erase_display_all() {
        let mut screen = Screen::from_lines(&["one", "two"]);
        screen.erase_display(EraseMode::All);
        assert_eq!(screen.rows().len(), 1);
        assert_eq!(screen.cursor, Cursor::default());
    }

    #[test]
    fn test_erase_past_trimmed_rows() {
        let mut screen = Screen::new();
        screen.cursor = Cursor { row: 3, col: 0 };
        screen.erase_line(EraseMode::ToEnd);
        assert_eq!(screen.rows().len(), 4);
    }

    #[test]
    fn test_alternate_restore() {
        let mut screen = Screen::from_lines(&["foo", "bar"]);
        assert_eq!(screen.cursor, Cursor { row: 1, col: 3 });
        screen.enter_alternate();
        assert!(screen.is_alternate());
        assert_eq!(screen.cursor, Cursor::default());
        screen.move_to(4, 4);
        screen.put('z');
        screen.exit_alternate();
        assert!(!screen.is_alternate());
        assert_eq!(screen.lines(), vec!["foo", "bar"]);
        assert_eq!(screen.cursor, Cursor { row: 1, col: 3 });
    }

    #[test]
    fn test_alternate_reenter_keeps_primary() {
        let mut screen = Screen::from_lines(&["primary"]);
        screen.enter_alternate();
        screen.put('a');
        screen.enter_alternate();
        screen.exit_alternate();
        assert_eq!(screen.lines(), vec!["primary"]);
    }

    #[test]
    fn test_exit_without_enter() {
        let mut screen = Screen::from_lines(&["stale"]);
        screen.exit_alternate();
        assert_eq!(screen.lines(), vec![""]);
        assert_eq!(screen.cursor, Cursor::default());
    }

    #[test]
    fn test_trim_trailing_empty() {
        let mut screen = Screen::from_lines(&["a", "", "b", "", ""]);
        screen.trim_trailing_empty();
        assert_eq!(screen.render(), "a\n\nb");

        let mut screen = Screen::from_lines(&["", ""]);
        screen.trim_trailing_empty();
        assert_eq!(screen.rows().len(), 1);
    }

    #[test]
    fn test_render_right_trims() {
        let screen = Screen::from_lines(&["ab   ", "  c "]);
        assert_eq!(screen.render(), "ab\n  c");
    }
}
