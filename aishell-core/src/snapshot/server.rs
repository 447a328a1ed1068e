use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{encode_frame, print_count_message, AckOutcome, Request, ACK, MAX_MESSAGE_LEN};
use crate::error::{Error, Result};
use crate::session::SessionContext;

/// Listening end of the snapshot socket. The socket file is removed on drop.
pub struct SnapshotServer {
    listener: UnixListener,
    path: PathBuf,
    ack_timeout: Duration,
}

/// What a connection was served with.
#[derive(Debug, PartialEq, Eq)]
pub enum Served {
    ScreenState { bytes: usize, ack: AckOutcome },
    PrintCount(u64),
    /// Unknown or missing request; closed without a reply.
    Rejected,
}

impl SnapshotServer {
    /// Bind at `path`, replacing any stale file, with a backlog of one.
    pub fn bind(path: &Path, ack_timeout: Duration) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => log::debug!("removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(path).map_err(|source| Error::Os {
            op: "bind(snapshot socket)",
            source,
        })?;
        // std listens with a large backlog; clients are served one at a time.
        if unsafe { libc::listen(listener.as_raw_fd(), 1) } < 0 {
            return Err(Error::last_os("listen(snapshot socket)"));
        }

        log::info!("snapshot socket listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            ack_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn accept(&self) -> io::Result<UnixStream> {
        self.listener.accept().map(|(stream, _)| stream)
    }

    /// Serve one connection to completion, then close it.
    ///
    /// Every read and write is bounded by the ack timeout, so a client
    /// that stops reading cannot hold the session loop.
    pub fn handle(&self, mut stream: UnixStream, ctx: &mut SessionContext) -> Result<Served> {
        stream.set_read_timeout(Some(self.ack_timeout))?;
        stream.set_write_timeout(Some(self.ack_timeout))?;

        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let n = match read_retrying(&mut stream, &mut buf) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => {
                log::warn!("snapshot client sent no request within {:?}", self.ack_timeout);
                return Ok(Served::Rejected);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(request) = Request::parse(&buf[..n]) else {
            log::debug!("ignoring unknown snapshot request ({} bytes)", n);
            return Ok(Served::Rejected);
        };
        log::debug!("snapshot request {}", request.as_str());

        match request {
            Request::ScreenState => {
                ctx.flush_pending();
                let state = ctx.emulator.screen_state();
                if let Err(e) = stream.write_all(&encode_frame(&state.text)?) {
                    if is_timeout(&e) {
                        log::warn!(
                            "snapshot client stopped reading; dropped {} byte screen",
                            state.text.len()
                        );
                    }
                    return Err(e.into());
                }
                ctx.record_screen_request();

                let ack = await_ack(&mut stream);
                match &ack {
                    AckOutcome::Acknowledged => {}
                    AckOutcome::Unexpected(msg) => {
                        log::warn!("unexpected end message from snapshot client: {:?}", msg)
                    }
                    AckOutcome::TimedOut => log::warn!("snapshot client connection timed out"),
                    AckOutcome::Closed => log::warn!("snapshot client closed before acknowledging"),
                }
                Ok(Served::ScreenState {
                    bytes: state.text.len(),
                    ack,
                })
            }
            Request::PrintCount => {
                let count = ctx.screen_requests();
                stream.write_all(print_count_message(count).as_bytes())?;
                Ok(Served::PrintCount(count))
            }
        }
    }
}

impl Drop for SnapshotServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to remove socket {}: {}", self.path.display(), e);
            }
        }
    }
}

fn await_ack(stream: &mut impl Read) -> AckOutcome {
    let mut buf = [0u8; MAX_MESSAGE_LEN];
    match read_retrying(stream, &mut buf) {
        Ok(0) => AckOutcome::Closed,
        Ok(n) if &buf[..n] == ACK.as_bytes() => AckOutcome::Acknowledged,
        Ok(n) => AckOutcome::Unexpected(String::from_utf8_lossy(&buf[..n]).into_owned()),
        Err(e) if is_timeout(&e) => AckOutcome::TimedOut,
        Err(e) => {
            log::debug!("ack read failed: {}", e);
            AckOutcome::Closed
        }
    }
}

/// Signal handlers run without SA_RESTART, so a resize can cut a read short.
fn read_retrying(stream: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
