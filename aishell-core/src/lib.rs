//! AIShell core: wraps an interactive shell in a pty, rebuilds its visible
//! screen from the output stream, and serves snapshots of that screen over
//! a Unix socket.

pub mod config;
pub mod error;
pub mod session;
pub mod signals;
pub mod snapshot;
pub mod terminal;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::{ExitReason, Session, SessionContext};
pub use snapshot::{SnapshotClient, SnapshotServer};
pub use terminal::{ScreenEmulator, ScreenState};
