//! The byte-accounted transfer loop.
//!
//! Reads and writes on the data connection run under three guards: the
//! stalled deadline, the abort wakeup, and normal I/O readiness. Every
//! successful move of bytes re-arms the stalled and idle timers and
//! accumulates into both the per-transfer and session counters. ASCII
//! translation inserts itself between the socket and the caller's buffer;
//! inserted CRs never reach the counters.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::session::SessionFlags;
use crate::timer::TimerKind;

use super::abort::AbortFlag;
use super::ascii::{xlate_ascii_read, xlate_ascii_write};
use super::DataChannel;

fn aborted_err() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "transfer aborted by OOB signal")
}

fn stalled_err() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "data transfer stalled")
}

async fn wait_abort(flag: Option<&AbortFlag>) {
    match flag {
        Some(flag) => flag.wake.notified().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Bounds a future by an optional deadline, mapping expiry to a stall.
pub(super) async fn with_deadline<T>(
    deadline: Option<Instant>,
    fut: impl std::future::Future<Output = io::Result<T>>,
) -> io::Result<T> {
    tokio::select! {
        res = fut => res,
        _ = wait_deadline(deadline) => Err(stalled_err()),
    }
}

async fn guarded_read(
    conn: &mut TcpStream,
    buf: &mut [u8],
    deadline: Option<Instant>,
    abort: Option<&AbortFlag>,
) -> io::Result<usize> {
    if abort.is_some_and(AbortFlag::is_aborted) {
        return Err(aborted_err());
    }

    tokio::select! {
        res = conn.read(buf) => res,
        _ = wait_abort(abort) => Err(aborted_err()),
        _ = wait_deadline(deadline) => Err(stalled_err()),
    }
}

async fn guarded_write_all(
    conn: &mut TcpStream,
    buf: &[u8],
    deadline: Option<Instant>,
    abort: Option<&AbortFlag>,
) -> io::Result<()> {
    if abort.is_some_and(AbortFlag::is_aborted) {
        return Err(aborted_err());
    }

    tokio::select! {
        res = conn.write_all(buf) => res,
        _ = wait_abort(abort) => Err(aborted_err()),
        _ = wait_deadline(deadline) => Err(stalled_err()),
    }
}

impl DataChannel {
    fn ascii_mode(&self) -> bool {
        self.flags.intersects(SessionFlags::ASCII | SessionFlags::ASCII_OVERRIDE)
    }

    /// Notes an abort-shaped error in the session flags so the command
    /// handler can distinguish ABOR from a plain broken connection.
    fn observe_error(&mut self, err: &io::Error) {
        if err.kind() == io::ErrorKind::ConnectionAborted {
            self.flags.set(SessionFlags::ABORT);
        }
    }

    /// Receives upload bytes into `cl_buf`, translating ASCII line endings
    /// when the session calls for it. Returns `Ok(0)` on clean end of
    /// data; with no open data connection there is nothing to read and
    /// the result is also `Ok(0)`.
    pub async fn xfer_read(&mut self, cl_buf: &mut [u8]) -> io::Result<usize> {
        if self.conn.is_none() || self.xfer.is_none() {
            return Ok(0);
        }

        let res = if self.ascii_mode() {
            self.read_ascii(cl_buf).await
        } else {
            self.read_binary(cl_buf).await
        };

        match res {
            Ok(moved) => {
                if moved > 0 {
                    self.timers.reset(TimerKind::Idle);
                }
                Ok(moved)
            }
            Err(err) => {
                self.observe_error(&err);
                Err(err)
            }
        }
    }

    async fn read_binary(&mut self, cl_buf: &mut [u8]) -> io::Result<usize> {
        let deadline = self.timers.deadline(TimerKind::Stalled);
        let conn = self.conn.as_mut().expect("checked by xfer_read");
        let n = guarded_read(conn, cl_buf, deadline, self.abort.as_deref()).await?;

        if n > 0 {
            self.timers.reset(TimerKind::Stalled);
            self.account(n as u64);
        }

        Ok(n)
    }

    async fn read_ascii(&mut self, cl_buf: &mut [u8]) -> io::Result<usize> {
        let mut emitted;

        loop {
            let mut buflen = self.xfer.as_ref().expect("checked by xfer_read").buflen;
            let deadline = self.timers.deadline(TimerKind::Stalled);

            let len = {
                let xfer = self.xfer.as_mut().expect("checked by xfer_read");
                let conn = self.conn.as_mut().expect("checked by xfer_read");
                guarded_read(conn, xfer.buf.space_mut(buflen), deadline, self.abort.as_deref())
                    .await?
            };

            if len > 0 {
                buflen += len;
                self.timers.reset(TimerKind::Stalled);
            }

            emitted = 0;

            if buflen > 0 {
                let xfer = self.xfer.as_mut().expect("checked by xfer_read");
                let mut carry = 0;

                // A final lone byte at end of data is passed through
                // untranslated, so a trailing CR cannot wedge the loop
                // waiting for a character that never comes.
                if len > 0 || buflen > 1 {
                    (emitted, carry) = xlate_ascii_read(xfer.buf.content_mut(buflen), buflen);
                } else {
                    emitted = buflen;
                }

                if emitted > cl_buf.len() {
                    carry += emitted - cl_buf.len();
                    emitted = cl_buf.len();
                }

                cl_buf[..emitted].copy_from_slice(xfer.buf.slice(emitted));

                if carry > 0 {
                    xfer.buf.carry_to_head(emitted, carry);
                }
                xfer.buflen = carry;

                if emitted > 0 {
                    self.account(emitted as u64);
                }
            }

            // Data arrived but none was emitted: the translator needs the
            // next byte (carry) before it can classify, so read again.
            if !(len > 0 && emitted == 0) {
                break;
            }
        }

        Ok(emitted)
    }

    /// Sends download bytes from `cl_buf`, slicing into transfer-buffer
    /// sized chunks and translating ASCII line endings when required.
    /// Returns the number of client bytes consumed, which excludes any
    /// inserted CRs.
    pub async fn xfer_write(&mut self, cl_buf: &[u8]) -> io::Result<usize> {
        if self.conn.is_none() || self.xfer.is_none() {
            return Ok(0);
        }

        let ascii = self.ascii_mode();
        let chunk_size = self.tunables.buffer_size;
        let mut total = 0usize;

        for chunk in cl_buf.chunks(chunk_size) {
            let deadline = self.timers.deadline(TimerKind::Stalled);

            {
                let xfer = self.xfer.as_mut().expect("checked by xfer_write");
                xfer.buf.load(chunk);

                let (wlen, expand) = if ascii {
                    xlate_ascii_write(&mut xfer.buf, chunk.len())
                } else {
                    (chunk.len(), 0)
                };

                let conn = self.conn.as_mut().expect("checked by xfer_write");
                let res = guarded_write_all(
                    conn,
                    xfer.buf.slice(wlen),
                    deadline,
                    self.abort.as_deref(),
                )
                .await;

                if let Err(err) = res {
                    self.observe_error(&err);
                    return Err(err);
                }

                total += wlen - expand;
            }

            self.timers.reset(TimerKind::Stalled);
            self.account((chunk.len()) as u64);
        }

        if total > 0 {
            self.timers.reset(TimerKind::Idle);
        }

        Ok(total)
    }

    /// Accumulates client-visible bytes into the transfer and session
    /// counters.
    pub(super) fn account(&mut self, n: u64) {
        if let Some(xfer) = &mut self.xfer {
            xfer.total_bytes += n;
        }
        self.total_bytes += n;
    }
}
