//! Signal handlers only flip flags and poke a wakeup pipe; the session
//! loop does the real work once poll returns.
//!
//! The pipe closes the gap between checking the flags and entering poll:
//! a signal landing there leaves the read end readable, so poll returns
//! at once instead of waiting for terminal or shell traffic.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::error::{Error, Result};

static RESIZE_PENDING: AtomicBool = AtomicBool::new(false);
static TERMINATE: AtomicBool = AtomicBool::new(false);
static WAKE_READ: AtomicI32 = AtomicI32::new(-1);
static WAKE_WRITE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_resize(_: libc::c_int) {
    RESIZE_PENDING.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn on_terminate(_: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
    wake();
}

/// Async-signal-safe: one non-blocking write, errno preserved.
fn wake() {
    let fd = WAKE_WRITE.load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }
    unsafe {
        let saved = *errno_ptr();
        let byte = 1u8;
        // a full pipe already means a wakeup is pending
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        *errno_ptr() = saved;
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_ptr() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_ptr() -> *mut libc::c_int {
    libc::__error()
}

/// Install SIGWINCH, SIGTERM and SIGHUP handlers and the wakeup pipe.
pub fn install() -> Result<()> {
    open_wake_pipe()?;
    set_handler(libc::SIGWINCH, on_resize)?;
    set_handler(libc::SIGTERM, on_terminate)?;
    set_handler(libc::SIGHUP, on_terminate)?;
    Ok(())
}

fn set_handler(signal: libc::c_int, handler: extern "C" fn(libc::c_int)) -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        // no SA_RESTART: poll must wake up with EINTR
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signal, &action, std::ptr::null_mut()) < 0 {
            return Err(Error::last_os("sigaction"));
        }
    }
    Ok(())
}

fn open_wake_pipe() -> Result<()> {
    if WAKE_READ.load(Ordering::SeqCst) >= 0 {
        return Ok(());
    }
    let mut fds = [-1 as libc::c_int; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) < 0 {
            return Err(Error::last_os("pipe(signal wakeup)"));
        }
        for fd in fds {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }
    WAKE_READ.store(fds[0], Ordering::SeqCst);
    WAKE_WRITE.store(fds[1], Ordering::SeqCst);
    Ok(())
}

/// Read end of the wakeup pipe, for the poll set. None before `install`.
pub fn wake_fd() -> Option<RawFd> {
    let fd = WAKE_READ.load(Ordering::SeqCst);
    (fd >= 0).then_some(fd)
}

/// Empty the wakeup pipe after poll reported it readable.
pub fn drain_wakeups() {
    let Some(fd) = wake_fd() else {
        return;
    };
    let mut buf = [0u8; 64];
    while unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) } > 0 {}
}

/// Consume a pending window-size change.
pub fn take_resize() -> bool {
    RESIZE_PENDING.swap(false, Ordering::SeqCst)
}

/// Mark a resize as pending, e.g. to force the initial size sync.
pub fn request_resize() {
    RESIZE_PENDING.store(true, Ordering::SeqCst);
}

pub fn termination_requested() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}
