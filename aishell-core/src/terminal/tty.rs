use std::os::fd::RawFd;

use crate::error::{Error, Result};

pub fn is_terminal(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// Current rows/columns of the terminal behind `fd`.
pub fn window_size(fd: RawFd) -> Result<libc::winsize> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };
    if result < 0 {
        return Err(Error::last_os("ioctl(TIOCGWINSZ)"));
    }
    Ok(size)
}

/// Puts the real terminal in raw mode and restores the saved settings on drop.
pub struct RawModeGuard {
    fd: RawFd,
    original: libc::termios,
}

impl RawModeGuard {
    pub fn enable(fd: RawFd) -> Result<Self> {
        unsafe {
            let mut original: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut original) < 0 {
                return Err(Error::last_os("tcgetattr(stdin)"));
            }
            let mut raw = original;
            libc::cfmakeraw(&mut raw);
            if libc::tcsetattr(fd, libc::TCSAFLUSH, &raw) < 0 {
                return Err(Error::last_os("tcsetattr(stdin)"));
            }
            Ok(Self { fd, original })
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let result = unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &self.original) };
        if result < 0 {
            log::error!(
                "failed to restore terminal settings: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_is_not_terminal() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        assert!(!is_terminal(fds[0]));
        assert!(window_size(fds[0]).is_err());
        assert!(RawModeGuard::enable(fds[0]).is_err());
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
