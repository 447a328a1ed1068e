use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use crate::config::{SESSION_ENV_VAR, SOCKET_ENV_VAR};
use crate::error::{Error, Result};

/// The child shell running behind the master side of a pseudo-terminal.
pub struct PtyProcess {
    /// Master file descriptor of the PTY
    master_fd: OwnedFd,
    /// Child process ID
    pub child_pid: libc::pid_t,
}

/// Outcome of a single read from a relayed descriptor.
#[derive(Debug, PartialEq, Eq)]
pub enum FdRead {
    Data(usize),
    /// Other side hung up (EOF, or EIO on a pty).
    Closed,
    /// Interrupted by a signal; retry after handling it.
    Interrupted,
}

impl PtyProcess {
    /// Fork `shell -i` onto a fresh pty.
    ///
    /// The child's environment gets the session marker and the snapshot
    /// socket path so programs inside the session can find us.
    pub fn spawn_shell(
        shell: &str,
        socket_path: &Path,
        size: Option<libc::winsize>,
    ) -> Result<Self> {
        // Everything the child touches is allocated before fork.
        let program = cstring(shell.as_bytes())?;
        let interactive = cstring(b"-i")?;
        let argv: [*const libc::c_char; 3] =
            [program.as_ptr(), interactive.as_ptr(), std::ptr::null()];
        let marker_key = cstring(SESSION_ENV_VAR.as_bytes())?;
        let marker_value = cstring(b"1")?;
        let socket_key = cstring(SOCKET_ENV_VAR.as_bytes())?;
        let socket_value = cstring(socket_path.as_os_str().as_bytes())?;

        let mut master_fd: libc::c_int = -1;
        let mut win_size = size.unwrap_or(libc::winsize {
            ws_row: 24,
            ws_col: 80,
            ws_xpixel: 0,
            ws_ypixel: 0,
        });

        unsafe {
            let child_pid = libc::forkpty(
                &mut master_fd,
                std::ptr::null_mut::<libc::c_char>(),
                std::ptr::null_mut::<libc::termios>(),
                &mut win_size,
            );

            if child_pid < 0 {
                return Err(Error::last_os("forkpty"));
            }

            if child_pid == 0 {
                libc::setenv(marker_key.as_ptr(), marker_value.as_ptr(), 1);
                libc::setenv(socket_key.as_ptr(), socket_value.as_ptr(), 1);
                libc::execvp(program.as_ptr(), argv.as_ptr());
                // exec failed
                libc::_exit(127);
            }

            log::debug!("spawned {} -i as pid {}", shell, child_pid);
            Ok(Self {
                master_fd: OwnedFd::from_raw_fd(master_fd),
                child_pid,
            })
        }
    }

    /// Line-discipline setup for the pty side: canonical mode with echo,
    /// so the child shell does its own editing and we observe the echo.
    pub fn enable_canonical_echo(&self) -> Result<()> {
        let fd = self.master_fd.as_raw_fd();
        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut termios) < 0 {
                return Err(Error::last_os("tcgetattr(pty)"));
            }
            canonical_echo(&mut termios);
            if libc::tcsetattr(fd, libc::TCSANOW, &termios) < 0 {
                return Err(Error::last_os("tcsetattr(pty)"));
            }
        }
        Ok(())
    }

    /// Propagate a window size to the pty and nudge the child.
    pub fn resize(&self, size: libc::winsize) -> Result<()> {
        let result =
            unsafe { libc::ioctl(self.master_fd.as_raw_fd(), libc::TIOCSWINSZ, &size) };
        if result < 0 {
            return Err(Error::last_os("ioctl(TIOCSWINSZ)"));
        }
        unsafe {
            libc::kill(self.child_pid, libc::SIGWINCH);
        }
        Ok(())
    }

    /// Write all of `data` to the PTY master (sends input to the shell).
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        write_all_fd(self.master_fd.as_raw_fd(), data)
    }

    /// Read whatever the shell produced. Only call after poll reported readiness.
    pub fn read(&self, buf: &mut [u8]) -> Result<FdRead> {
        read_fd(self.master_fd.as_raw_fd(), buf)
    }

    /// Get the raw file descriptor for polling.
    pub fn raw_fd(&self) -> RawFd {
        self.master_fd.as_raw_fd()
    }

    /// Non-blocking reap. True once the child has exited.
    pub fn try_reap(&self) -> bool {
        let mut status: libc::c_int = 0;
        let waited = unsafe { libc::waitpid(self.child_pid, &mut status, libc::WNOHANG) };
        waited == self.child_pid || waited < 0
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.try_reap() {
            return;
        }
        unsafe {
            // A shell ignores SIGTERM when interactive; hang it up instead.
            libc::kill(self.child_pid, libc::SIGHUP);
        }
        std::thread::sleep(Duration::from_millis(100));
        if self.try_reap() {
            return;
        }
        log::warn!("shell pid {} ignored SIGHUP; killing", self.child_pid);
        unsafe {
            libc::kill(self.child_pid, libc::SIGKILL);
            let mut status: libc::c_int = 0;
            // Blocking wait to ensure zombie is reaped
            libc::waitpid(self.child_pid, &mut status, 0);
        }
    }
}

fn cstring(s: &[u8]) -> Result<CString> {
    CString::new(s).map_err(|e| Error::Os {
        op: "exec argument",
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    })
}

fn canonical_echo(termios: &mut libc::termios) {
    termios.c_lflag |= libc::ECHO | libc::ICANON;
    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;
}

/// One `read(2)` on `fd`.
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> Result<FdRead> {
    let result = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if result > 0 {
        return Ok(FdRead::Data(result as usize));
    }
    if result == 0 {
        return Ok(FdRead::Closed);
    }
    classify_read_error(std::io::Error::last_os_error())
}

/// Linux reports a vanished child on the master as EIO rather than EOF.
fn classify_read_error(err: std::io::Error) -> Result<FdRead> {
    match err.raw_os_error() {
        Some(libc::EIO) => Ok(FdRead::Closed),
        Some(libc::EINTR) | Some(libc::EAGAIN) => Ok(FdRead::Interrupted),
        _ => Err(Error::Os { op: "read", source: err }),
    }
}

/// Loop over short writes; EINTR is retried.
pub(crate) fn write_all_fd(fd: RawFd, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let result =
            unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(Error::Os {
                op: "write",
                source: err,
            });
        }
        data = &data[result as usize..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_echo_flags() {
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        canonical_echo(&mut termios);
        assert_ne!(termios.c_lflag & libc::ECHO, 0);
        assert_ne!(termios.c_lflag & libc::ICANON, 0);
        assert_eq!(termios.c_cc[libc::VMIN], 1);
    }

    #[test]
    fn test_eio_means_closed() {
        let eio = std::io::Error::from_raw_os_error(libc::EIO);
        assert_eq!(classify_read_error(eio).unwrap(), FdRead::Closed);

        let eintr = std::io::Error::from_raw_os_error(libc::EINTR);
        assert_eq!(classify_read_error(eintr).unwrap(), FdRead::Interrupted);

        let ebadf = std::io::Error::from_raw_os_error(libc::EBADF);
        assert!(classify_read_error(ebadf).is_err());
    }

    #[test]
    fn test_write_all_fd_pipe() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_end, write_end) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        write_all_fd(write_end.as_raw_fd(), b"echo hi\r").unwrap();

        let mut buf = [0u8; 16];
        let n = match read_fd(read_end.as_raw_fd(), &mut buf).unwrap() {
            FdRead::Data(n) => n,
            other => panic!("unexpected read outcome: {other:?}"),
        };
        assert_eq!(&buf[..n], b"echo hi\r");

        drop(write_end);
        assert_eq!(read_fd(read_end.as_raw_fd(), &mut buf).unwrap(), FdRead::Closed);
    }

    #[test]
    fn test_cstring_rejects_nul() {
        assert!(cstring(b"bad\0shell").is_err());
    }
}
