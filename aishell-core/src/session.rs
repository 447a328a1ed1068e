//! The session loop: one thread polling the real terminal, the pty
//! master, and the snapshot socket.

use std::borrow::Cow;
use std::path::PathBuf;

use crate::config::{self, SessionConfig};
use crate::error::{Error, Result};
use crate::signals;
use crate::snapshot::SnapshotServer;
use crate::terminal::pty::{read_fd, write_all_fd};
use crate::terminal::tty::{self, RawModeGuard};
use crate::terminal::{FdRead, PtyProcess, ScreenEmulator};

/// Shell output read from the pty but not yet interpreted.
pub struct PendingBuffer {
    bytes: Vec<u8>,
    threshold: usize,
}

impl PendingBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            bytes: Vec::new(),
            threshold,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn over_threshold(&self) -> bool {
        self.bytes.len() > self.threshold
    }

    /// Hand every complete line to `emulator`; the trailing partial line
    /// stays buffered as raw bytes. Returns the number of lines fed.
    pub fn flush_into(&mut self, emulator: &mut ScreenEmulator) -> usize {
        let Some(last_newline) = self.bytes.iter().rposition(|&b| b == b'\n') else {
            return 0;
        };
        let rest = self.bytes.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.bytes, rest);

        let mut fed = 0;
        for line in complete[..last_newline].split(|&b| b == b'\n') {
            emulator.process_line(&decode_dropping_invalid(line));
            fed += 1;
        }
        fed
    }
}

/// UTF-8 decode that skips invalid sequences instead of replacing them.
fn decode_dropping_invalid(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()),
    }
}

/// State owned by the session loop and lent to the snapshot handler.
pub struct SessionContext {
    pub emulator: ScreenEmulator,
    pending: PendingBuffer,
    screen_requests: u64,
}

impl SessionContext {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            emulator: ScreenEmulator::new(config.diagnostic_log_limit),
            pending: PendingBuffer::new(config.flush_threshold),
            screen_requests: 0,
        }
    }

    /// Buffer shell output, interpreting it once the buffer grows too large.
    pub fn ingest(&mut self, data: &[u8]) {
        self.pending.push(data);
        if self.pending.over_threshold() {
            self.flush_pending();
        }
    }

    pub fn flush_pending(&mut self) {
        let fed = self.pending.flush_into(&mut self.emulator);
        if fed > 0 {
            log::trace!("interpreted {} lines, {} bytes pending", fed, self.pending.len());
        }
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn record_screen_request(&mut self) -> u64 {
        self.screen_requests += 1;
        self.screen_requests
    }

    pub fn screen_requests(&self) -> u64 {
        self.screen_requests
    }
}

/// Why the relay loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Real terminal reached end-of-input.
    InputClosed,
    /// Child shell exited.
    ShellExited,
    /// SIGTERM or SIGHUP.
    Terminated,
}

/// One wrapped shell, from fork to teardown.
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Run until the user disconnects or the shell exits.
    ///
    /// Teardown happens through drops on every path: terminal settings
    /// first, then the child, then the socket file.
    pub fn run(self) -> Result<ExitReason> {
        if config::inside_session() {
            return Err(Error::NestedSession);
        }

        let socket_path = self.socket_path()?;
        let server = SnapshotServer::bind(&socket_path, self.config.ack_timeout())?;

        let stdin = libc::STDIN_FILENO;
        let interactive = tty::is_terminal(stdin);
        let initial_size = if interactive {
            Some(tty::window_size(stdin)?)
        } else {
            log::warn!("stdin is not a terminal; running without raw mode");
            None
        };

        let pty = PtyProcess::spawn_shell(&self.config.shell, server.path(), initial_size)?;
        signals::install()?;
        let _raw_mode = if interactive {
            Some(RawModeGuard::enable(stdin)?)
        } else {
            None
        };
        pty.enable_canonical_echo()?;
        signals::request_resize();

        let mut ctx = SessionContext::new(&self.config);
        let reason = self.relay(&pty, &server, &mut ctx, interactive)?;
        log::info!("session ended: {:?}", reason);
        Ok(reason)
    }

    fn socket_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.socket_path {
            return Ok(path.clone());
        }
        let placeholder = tempfile::Builder::new()
            .prefix("aishell-")
            .suffix(".sock")
            .tempfile()?;
        placeholder
            .into_temp_path()
            .keep()
            .map_err(|e| Error::Io(e.error))
    }

    fn relay(
        &self,
        pty: &PtyProcess,
        server: &SnapshotServer,
        ctx: &mut SessionContext,
        interactive: bool,
    ) -> Result<ExitReason> {
        let stdin = libc::STDIN_FILENO;
        let stdout = libc::STDOUT_FILENO;
        let mut buf = vec![0u8; self.config.read_chunk.max(1)];

        loop {
            if signals::termination_requested() {
                return Ok(ExitReason::Terminated);
            }
            if signals::take_resize() && interactive {
                pty.resize(tty::window_size(stdin)?)?;
            }

            // -1 is skipped by poll; only reachable before signals::install
            let wake = signals::wake_fd().unwrap_or(-1);
            let mut fds = [
                pollfd(stdin),
                pollfd(pty.raw_fd()),
                pollfd(server.raw_fd()),
                pollfd(wake),
            ];
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if ready < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(Error::Os {
                    op: "poll",
                    source: err,
                });
            }

            if readable(&fds[3]) {
                // flags are rechecked at the top of the loop
                signals::drain_wakeups();
            }

            if readable(&fds[0]) {
                match read_fd(stdin, &mut buf)? {
                    FdRead::Data(n) => pty.write_all(&buf[..n])?,
                    FdRead::Closed => return Ok(ExitReason::InputClosed),
                    FdRead::Interrupted => {}
                }
            }

            if readable(&fds[1]) {
                match pty.read(&mut buf)? {
                    FdRead::Data(n) => {
                        write_all_fd(stdout, &buf[..n])?;
                        ctx.ingest(&buf[..n]);
                    }
                    FdRead::Closed => return Ok(ExitReason::ShellExited),
                    FdRead::Interrupted => {}
                }
            }

            if readable(&fds[2]) {
                match server.accept() {
                    Ok(stream) => {
                        ctx.flush_pending();
                        if let Err(e) = server.handle(stream, ctx) {
                            log::warn!("snapshot connection failed: {}", e);
                        }
                    }
                    Err(e) => log::warn!("snapshot accept failed: {}", e),
                }
            }
        }
    }
}

fn pollfd(fd: libc::c_int) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

fn readable(fd: &libc::pollfd) -> bool {
    fd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: usize) -> SessionConfig {
        SessionConfig {
            flush_threshold: threshold,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_flush_keeps_partial_line() {
        let mut emulator = ScreenEmulator::default();
        let mut pending = PendingBuffer::new(10_000);
        pending.push(b"one\r\ntwo\r\nthr");
        assert_eq!(pending.flush_into(&mut emulator), 2);
        assert_eq!(pending.len(), 3);

        pending.push(b"ee\n");
        assert_eq!(pending.flush_into(&mut emulator), 1);
        assert!(pending.is_empty());
        assert_eq!(emulator.screen_state().text, "one\ntwo\nthree");
    }

    #[test]
    fn test_flush_without_newline_is_noop() {
        let mut emulator = ScreenEmulator::default();
        let mut pending = PendingBuffer::new(10_000);
        pending.push(b"$ partial prompt");
        assert_eq!(pending.flush_into(&mut emulator), 0);
        assert_eq!(pending.len(), 16);
        assert_eq!(emulator.screen_state().text, "");
    }

    #[test]
    fn test_split_multibyte_character_survives() {
        let mut emulator = ScreenEmulator::default();
        let mut pending = PendingBuffer::new(10_000);
        let sparkle = "✨".as_bytes();
        pending.push(&sparkle[..1]);
        pending.flush_into(&mut emulator);
        pending.push(&sparkle[1..]);
        pending.push(b"\n");
        pending.flush_into(&mut emulator);
        assert_eq!(emulator.screen_state().text, "✨");
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        assert_eq!(decode_dropping_invalid(b"ok\xffgo"), "okgo");
        assert_eq!(decode_dropping_invalid(b"plain"), "plain");
    }

    #[test]
    fn test_ingest_flushes_over_threshold() {
        let mut ctx = SessionContext::new(&config(8));
        ctx.ingest(b"abc\n");
        assert_eq!(ctx.pending().len(), 4);
        ctx.ingest(b"defgh\nij");
        assert_eq!(ctx.pending().len(), 2);
        assert_eq!(ctx.emulator.screen_state().text, "abc\ndefgh");
    }

    #[test]
    fn test_flush_before_snapshot_sees_everything() {
        let mut ctx = SessionContext::new(&config(10_000));
        ctx.ingest(b"$ make\r\nok\r\n$ ");
        assert_eq!(ctx.emulator.screen_state().text, "");
        ctx.flush_pending();
        assert_eq!(ctx.emulator.screen_state().text, "$ make\nok");
    }

    #[test]
    fn test_request_counter() {
        let mut ctx = SessionContext::new(&config(10_000));
        assert_eq!(ctx.screen_requests(), 0);
        assert_eq!(ctx.record_screen_request(), 1);
        assert_eq!(ctx.record_screen_request(), 2);
        assert_eq!(ctx.screen_requests(), 2);
    }

    #[test]
    fn test_configured_socket_path() {
        let session = Session::new(SessionConfig {
            socket_path: Some(PathBuf::from("/tmp/aishell-test.sock")),
            ..SessionConfig::default()
        });
        assert_eq!(session.socket_path().unwrap(), PathBuf::from("/tmp/aishell-test.sock"));
    }

    #[test]
    fn test_generated_socket_path() {
        let session = Session::new(SessionConfig::default());
        let path = session.socket_path().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("aishell-"));
        assert!(name.ends_with(".sock"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_readable_flags() {
        let mut fd = pollfd(0);
        assert!(!readable(&fd));
        fd.revents = libc::POLLHUP;
        assert!(readable(&fd));
    }
}
