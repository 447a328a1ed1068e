use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Set to `1` in the child shell's environment; its presence at startup
/// means we are already running inside a session.
pub const SESSION_ENV_VAR: &str = "AISHELL_ACTIVE";

/// Names the snapshot socket for processes started inside the session.
pub const SOCKET_ENV_VAR: &str = "AISHELL_SOCKET";

/// Points at an optional JSON file overriding [`SessionConfig`] defaults.
pub const CONFIG_ENV_VAR: &str = "AISHELL_CONFIG";

/// Log filter for the binary (env_logger syntax).
pub const LOG_ENV_VAR: &str = "AISHELL_LOG";

const FALLBACK_SHELL: &str = "/bin/bash";

/// Session configuration, passed by value to the components that need it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell to exec inside the pty, started with `-i`.
    pub shell: String,
    /// Snapshot socket path; a unique temp path is allocated when unset.
    pub socket_path: Option<PathBuf>,
    /// Pending output is fed to the interpreter once it grows past this many bytes.
    pub flush_threshold: usize,
    /// How long a snapshot connection may stay silent.
    pub ack_timeout_secs: u64,
    /// Bytes per read on stdin and the pty master.
    pub read_chunk: usize,
    /// Diagnostic log lines retained by the interpreter. 0 disables the log.
    pub diagnostic_log_limit: usize,
    /// Write logs here instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| FALLBACK_SHELL.to_string()),
            socket_path: None,
            flush_threshold: 10_000,
            ack_timeout_secs: 5,
            read_chunk: 1024,
            diagnostic_log_limit: 10_000,
            log_file: None,
        }
    }
}

impl SessionConfig {
    /// Defaults, overlaid by the file named in `AISHELL_CONFIG` if set.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

/// True when the current process was started inside an AIShell session.
pub fn inside_session() -> bool {
    std::env::var_os(SESSION_ENV_VAR).is_some_and(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(!config.shell.is_empty());
        assert_eq!(config.flush_threshold, 10_000);
        assert_eq!(config.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.read_chunk, 1024);
        assert!(config.socket_path.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            SessionConfig::from_json(r#"{"shell": "/bin/zsh", "ack_timeout_secs": 2}"#).unwrap();
        assert_eq!(config.shell, "/bin/zsh");
        assert_eq!(config.ack_timeout_secs, 2);
        assert_eq!(config.flush_threshold, 10_000);
    }

    #[test]
    fn test_invalid_json() {
        let result = SessionConfig::from_json("{ not json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = SessionConfig::from_file(Path::new("/nonexistent_path_xyz/config.json"));
        assert!(matches!(result, Err(Error::ConfigRead { .. })));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"flush_threshold": 64, "log_file": "/tmp/aishell.log"}"#)
            .unwrap();
        let config = SessionConfig::from_file(&path).unwrap();
        assert_eq!(config.flush_threshold, 64);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/aishell.log")));
    }
}
