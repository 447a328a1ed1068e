//! Everything that touches a terminal: the virtual screen, the escape
//! interpreter that drives it, the pty the shell runs on, and the real
//! terminal we relay to.

pub mod emulator;
pub mod pty;
pub mod screen;
pub mod tty;

pub use emulator::{DiagnosticLog, ScreenEmulator, ScreenState};
pub use pty::{FdRead, PtyProcess};
pub use screen::{Cursor, EraseMode, Screen};
