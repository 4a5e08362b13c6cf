//! Zero-copy file-to-socket dispatch for binary downloads.
//!
//! Bypasses the userspace translation buffer entirely, so it refuses
//! ASCII-mode and upload-direction transfers. The socket is flipped to
//! blocking for the duration; interrupted calls are resumed with the
//! offset and count advanced, and the platform differences in offset
//! semantics are normalized to "offset advances on success, untouched on
//! error".

use std::io;

#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};

use crate::session::{Direction, SessionFlags};
use crate::timer::TimerKind;

use super::DataChannel;

impl DataChannel {
    /// Streams `count` bytes of `file_fd` starting at `*offset` straight
    /// to the data connection. Returns the bytes sent; `*offset` is
    /// advanced accordingly.
    #[cfg(unix)]
    pub async fn sendfile(
        &mut self,
        file_fd: RawFd,
        offset: &mut u64,
        count: usize,
    ) -> io::Result<u64> {
        if self.xfer.as_ref().map(|x| x.direction) == Some(Direction::Read) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-copy dispatch is download-only",
            ));
        }

        if self.flags.intersects(SessionFlags::ASCII | SessionFlags::ASCII_OVERRIDE) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-copy dispatch requires binary mode",
            ));
        }

        let sock_fd = self
            .conn
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no data connection"))?
            .as_raw_fd();

        // sendfile(2) wants a blocking socket; restore the flags after.
        let orig_flags = get_fl(sock_fd)?;
        if orig_flags & libc::O_NONBLOCK != 0 {
            set_fl(sock_fd, orig_flags & !libc::O_NONBLOCK)?;
        }

        let result = self.sendfile_loop(sock_fd, file_fd, offset, count);

        if orig_flags & libc::O_NONBLOCK != 0 {
            set_fl(sock_fd, orig_flags)?;
        }

        let total = result?;

        self.timers.reset(TimerKind::Stalled);
        self.timers.reset(TimerKind::Idle);

        Ok(total)
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn sendfile_loop(
        &mut self,
        sock_fd: RawFd,
        file_fd: RawFd,
        offset: &mut u64,
        count: usize,
    ) -> io::Result<u64> {
        let mut remaining = count;
        let mut total: u64 = 0;

        loop {
            let mut off = *offset as libc::off_t;

            let n = unsafe { libc::sendfile(sock_fd, file_fd, &mut off, remaining) };

            if n == -1 {
                let err = io::Error::last_os_error();

                if err.raw_os_error() == Some(libc::EINTR) {
                    if self.abort.as_ref().is_some_and(|f| f.is_aborted()) {
                        self.flags.set(SessionFlags::ABORT);
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "transfer aborted by OOB signal",
                        ));
                    }

                    self.timers.reset(TimerKind::Stalled);
                    self.timers.reset(TimerKind::Idle);
                    continue;
                }

                // Offset is left at its pre-call value on error.
                return Err(err);
            }

            let n = n as usize;
            *offset = off as u64;
            self.account(n as u64);
            total += n as u64;

            if n == 0 || n >= remaining {
                return Ok(total);
            }

            // A signal cut the call short; resume where it stopped.
            remaining -= n;
            self.timers.reset(TimerKind::Stalled);
            self.timers.reset(TimerKind::Idle);
        }
    }

    #[cfg(any(target_os = "freebsd", target_os = "macos"))]
    fn sendfile_loop(
        &mut self,
        sock_fd: RawFd,
        file_fd: RawFd,
        offset: &mut u64,
        count: usize,
    ) -> io::Result<u64> {
        let mut remaining = count;
        let mut total: u64 = 0;

        loop {
            let mut sent: libc::off_t = 0;

            #[cfg(target_os = "freebsd")]
            let rc = unsafe {
                libc::sendfile(
                    file_fd,
                    sock_fd,
                    *offset as libc::off_t,
                    remaining,
                    std::ptr::null_mut(),
                    &mut sent,
                    0,
                )
            };

            #[cfg(target_os = "macos")]
            let rc = {
                sent = remaining as libc::off_t;
                unsafe {
                    libc::sendfile(
                        file_fd,
                        sock_fd,
                        *offset as libc::off_t,
                        &mut sent,
                        std::ptr::null_mut(),
                        0,
                    )
                }
            };

            let n = sent as usize;

            if rc == -1 {
                let err = io::Error::last_os_error();

                // BSD reports progress through `sent` even on EINTR.
                if err.raw_os_error() == Some(libc::EINTR) {
                    if self.abort.as_ref().is_some_and(|f| f.is_aborted()) {
                        self.flags.set(SessionFlags::ABORT);
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "transfer aborted by OOB signal",
                        ));
                    }

                    *offset += n as u64;
                    self.account(n as u64);
                    total += n as u64;

                    if n >= remaining {
                        return Ok(total);
                    }
                    remaining -= n;

                    self.timers.reset(TimerKind::Stalled);
                    self.timers.reset(TimerKind::Idle);
                    continue;
                }

                return Err(err);
            }

            *offset += n as u64;
            self.account(n as u64);
            total += n as u64;
            return Ok(total);
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "macos"
    )))]
    fn sendfile_loop(
        &mut self,
        _sock_fd: RawFd,
        _file_fd: RawFd,
        _offset: &mut u64,
        _count: usize,
    ) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no zero-copy primitive on this platform"))
    }
}

#[cfg(unix)]
fn get_fl(fd: RawFd) -> io::Result<i32> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(flags)
    }
}

#[cfg(unix)]
fn set_fl(fd: RawFd, flags: i32) -> io::Result<()> {
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
