use std::io;
use std::path::PathBuf;

/// Errors surfaced by the AIShell core.
///
/// Only setup failures (PTY, terminal configuration, socket bind) are
/// fatal to a session. Protocol hiccups on a snapshot connection are
/// reported through [`crate::snapshot::AckOutcome`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("already inside an AIShell session; nested sessions are not supported")]
    NestedSession,

    #[error("AIShell socket not found ({0} is unset). Make sure AIShell is running.")]
    SocketNotConfigured(&'static str),

    #[error("error connecting to AIShell socket {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Wrap the last OS error for a named system call.
    pub(crate) fn last_os(op: &'static str) -> Self {
        Error::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
