use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ACK, GET_PRINT_COUNT, GET_SCREEN_STATE};
use crate::config::SOCKET_ENV_VAR;
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of the snapshot socket, for processes running inside a session.
pub struct SnapshotClient {
    path: PathBuf,
    timeout: Duration,
}

impl SnapshotClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Locate the live session through `AISHELL_SOCKET`.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(SOCKET_ENV_VAR) {
            Some(path) if !path.is_empty() => Ok(Self::new(path)),
            _ => Err(Error::SocketNotConfigured(SOCKET_ENV_VAR)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.path).map_err(|source| Error::Connect {
            path: self.path.clone(),
            source,
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    /// Fetch the rendered screen, keeping only the last `line_limit` lines
    /// when a positive limit is given.
    pub fn screen_state(&self, line_limit: Option<usize>) -> Result<String> {
        let mut stream = self.connect()?;
        stream.write_all(GET_SCREEN_STATE.as_bytes())?;

        let mut len = [0u8; 4];
        stream.read_exact(&mut len)?;
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        stream
            .read_exact(&mut payload)
            .map_err(|e| Error::Protocol(format!("truncated screen payload: {e}")))?;
        stream.write_all(ACK.as_bytes())?;

        let text = String::from_utf8(payload)
            .map_err(|e| Error::Protocol(format!("screen payload is not UTF-8: {e}")))?;
        Ok(match line_limit {
            Some(limit) if limit > 0 => last_lines(&text, limit),
            _ => text,
        })
    }

    /// The server's request-count sentence.
    pub fn print_count(&self) -> Result<String> {
        let mut stream = self.connect()?;
        stream.write_all(GET_PRINT_COUNT.as_bytes())?;
        let mut reply = String::new();
        stream.read_to_string(&mut reply)?;
        Ok(reply)
    }
}

fn last_lines(text: &str, limit: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].join("\n")
}
