//! Data-connection engine.
//!
//! Owns establishment and teardown of the FTP data channel in both active
//! and passive modes, the 150/226/4xx reply traffic tied to it, transfer
//! supervision timers, the OOB abort protocol, and the byte-accounted
//! transfer loop with ASCII translation (see [`ascii`], [`xfer`] and
//! [`sendfile`]).
//!
//! The engine assumes the one-session-per-task model: a session drives at
//! most one transfer at a time, and the only asynchronous disturbance is
//! the SIGURG-driven abort.

mod abort;
mod ascii;
mod sendfile;
mod xfer;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::Tunables;
use crate::netio;
use crate::reply::{ReplyCode, ReplySink};
use crate::session::{Direction, SessionFlags, XferType};
use crate::timer::{TimerKind, Timers};

use abort::AbortFlag;
use ascii::XferBuf;

/// Per-transfer scratch state, dropped wholesale by [`DataChannel::cleanup`].
struct XferState {
    filename: String,
    direction: Direction,
    xfer_type: XferType,
    buf: XferBuf,
    /// Bytes carried over at the head of `buf` between ASCII reads.
    buflen: usize,
    total_bytes: u64,
    start_time: Option<Instant>,
}

/// The data-connection engine for one session.
pub struct DataChannel {
    tunables: Tunables,
    pub flags: SessionFlags,
    timers: Timers,
    conn: Option<TcpStream>,
    pasv: Option<TcpListener>,
    active_target: Option<SocketAddr>,
    ctrl_local: Option<SocketAddr>,
    xfer: Option<XferState>,
    abort: Option<Arc<AbortFlag>>,
    total_bytes: u64,
}

impl DataChannel {
    pub fn new(tunables: Tunables) -> Self {
        Self {
            timers: Timers::new(&tunables),
            tunables,
            flags: SessionFlags::default(),
            conn: None,
            pasv: None,
            active_target: None,
            ctrl_local: None,
            xfer: None,
            abort: None,
            total_bytes: 0,
        }
    }

    /// Hands over the listening socket negotiated by `PASV`.
    pub fn prepare_passive(&mut self, listener: TcpListener) {
        self.flags.set(SessionFlags::PASSIVE);
        self.pasv = Some(listener);
    }

    /// Records the client address advertised by `PORT`/`EPRT`, plus the
    /// control connection's local address for the port-1 source bind.
    /// Passing no control address skips the bind and uses an ephemeral
    /// source port.
    pub fn prepare_active(&mut self, target: SocketAddr, ctrl_local: Option<SocketAddr>) {
        self.flags.clear(SessionFlags::PASSIVE);
        self.active_target = Some(target);
        self.ctrl_local = ctrl_local;
    }

    /// Lazily sets up per-transfer state ahead of `open`.
    pub fn init(&mut self, filename: &str, direction: Direction) {
        if let Some(xfer) = &mut self.xfer {
            if !self.flags.contains(SessionFlags::PASSIVE) {
                debug!("data_init oddity: transfer state exists in non-PASV mode.");
            }
            xfer.direction = direction;
        } else {
            self.new_xfer(filename, direction);
        }
    }

    /// Marks the pending transfer as `APPE`/`STOU` flavored, which shapes
    /// the 150 reply.
    pub fn set_xfer_type(&mut self, xfer_type: XferType) {
        if let Some(xfer) = &mut self.xfer {
            xfer.xfer_type = xfer_type;
        }
    }

    fn new_xfer(&mut self, filename: &str, direction: Direction) {
        self.xfer = Some(XferState {
            filename: filename.to_owned(),
            direction,
            xfer_type: XferType::default(),
            buf: XferBuf::new(self.tunables.buffer_size),
            buflen: 0,
            total_bytes: 0,
            start_time: None,
        });
    }

    /// Establishes the data connection and announces it with a 150 reply.
    ///
    /// Passive mode accepts on the socket handed over by `PASV`; active
    /// mode connects out to the advertised client address. On failure a
    /// 425 reply is queued and the error returned; an inconsistent
    /// passive state is fatal to the session.
    pub async fn open<R: ReplySink>(
        &mut self,
        reply: &mut R,
        filename: &str,
        reason: Option<&str>,
        direction: Direction,
        size: Option<u64>,
    ) -> io::Result<()> {
        if let Some(xfer) = &mut self.xfer {
            xfer.direction = direction;
        } else {
            self.new_xfer(filename, direction);
        }

        let reason = reason.unwrap_or(filename).to_owned();

        // Bound the whole connection open by the stalled timer.
        self.timers.reset(TimerKind::Stalled);

        let stream = if self.flags.contains(SessionFlags::PASSIVE) {
            self.pasv_open(reply).await?
        } else {
            self.active_open(reply).await?
        };

        self.send_150(reply, &reason, size).await?;

        self.conn = Some(stream);
        self.abort = Some(abort::arm());

        if let Some(xfer) = &mut self.xfer {
            xfer.start_time = Some(Instant::now());
        }

        self.flags.set(SessionFlags::XFER);
        self.timers.reset(TimerKind::NoXfer);
        Ok(())
    }

    async fn pasv_open<R: ReplySink>(&mut self, reply: &mut R) -> io::Result<TcpStream> {
        let Some(listener) = self.pasv.take() else {
            error!("PASV mode set, but no data connection listening");
            return Err(io::Error::other("no listening data socket in PASV mode"));
        };

        let accepted = xfer::with_deadline(
            self.timers.deadline(TimerKind::Stalled),
            listener.accept(),
        )
        .await;

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                reply
                    .add_err(
                        ReplyCode::CantOpenData,
                        &format!("Unable to build data connection: {}", err),
                    )
                    .await?;
                return Err(err);
            }
        };

        self.apply_socket_opts(&stream);
        debug!(
            "passive data connection opened - remote : {}",
            peer
        );
        Ok(stream)
    }

    async fn active_open<R: ReplySink>(&mut self, reply: &mut R) -> io::Result<TcpStream> {
        let result = self.active_connect().await;

        match result {
            Ok(stream) => {
                self.apply_socket_opts(&stream);
                debug!(
                    "active data connection opened - remote : {}",
                    stream.peer_addr()?
                );
                Ok(stream)
            }
            Err(err) => {
                reply
                    .add_err(
                        ReplyCode::CantOpenData,
                        &format!("Unable to build data connection: {}", err),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    async fn active_connect(&mut self) -> io::Result<TcpStream> {
        let target = self
            .active_target
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no PORT target"))?;

        let socket = match target {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;

        // The canonical source is the control port minus one (ftp-data).
        if let Some(ctrl) = self.ctrl_local {
            let source = SocketAddr::new(ctrl.ip(), ctrl.port().saturating_sub(1));
            socket.bind(source)?;
        }

        if let Some(xfer) = &self.xfer {
            match xfer.direction {
                Direction::Read => {
                    if let Some(size) = self.tunables.tcp_rcvbuf {
                        socket.set_recv_buffer_size(size as u32)?;
                    }
                }
                Direction::Write => {
                    if let Some(size) = self.tunables.tcp_sndbuf {
                        socket.set_send_buffer_size(size as u32)?;
                    }
                }
            }
        }

        xfer::with_deadline(self.timers.deadline(TimerKind::Stalled), socket.connect(target))
            .await
    }

    fn apply_socket_opts(&self, stream: &TcpStream) {
        #[cfg(unix)]
        {
            let (rcv, snd) = match self.xfer.as_ref().map(|x| x.direction) {
                Some(Direction::Read) => (self.tunables.tcp_rcvbuf, None),
                Some(Direction::Write) => (None, self.tunables.tcp_sndbuf),
                None => (None, None),
            };
            netio::set_socket_opts(stream, rcv, snd);
            netio::set_proto_opts(stream, self.tunables.tcp_mss);
        }
    }

    fn mode_string(&self) -> &'static str {
        if self.flags.intersects(SessionFlags::ASCII | SessionFlags::ASCII_OVERRIDE) {
            "ASCII"
        } else {
            "BINARY"
        }
    }

    async fn send_150<R: ReplySink>(
        &mut self,
        reply: &mut R,
        reason: &str,
        size: Option<u64>,
    ) -> io::Result<()> {
        let unique = self
            .xfer
            .as_ref()
            .map(|x| x.xfer_type == XferType::Unique)
            .unwrap_or(false);

        if unique {
            // RFC 1123 4.1.2.9 dictates this exact shape for STOU.
            return reply.send(ReplyCode::FileStatusOk, &format!("FILE: {}", reason)).await;
        }

        let text = match size {
            Some(size) => format!(
                "Opening {} mode data connection for {} ({} bytes)",
                self.mode_string(),
                reason,
                size
            ),
            None => {
                format!("Opening {} mode data connection for {}", self.mode_string(), reason)
            }
        };

        reply.send(ReplyCode::FileStatusOk, &text).await
    }

    /// Closes a successful transfer, emitting `226` unless quieted.
    pub async fn close<R: ReplySink>(&mut self, reply: &mut R, quiet: bool) -> io::Result<()> {
        abort::disarm();
        self.abort = None;

        if let Some(conn) = self.conn.take() {
            netio::lingering_close(conn, self.tunables.linger());
        }

        self.timers.reset(TimerKind::NoXfer);
        self.timers.remove(TimerKind::Stalled);
        self.timers.reset(TimerKind::Idle);

        self.flags.clear(
            SessionFlags::ABORT
                | SessionFlags::XFER
                | SessionFlags::PASSIVE
                | SessionFlags::ASCII_OVERRIDE,
        );

        if !quiet {
            reply.add(ReplyCode::ClosingData, "Transfer complete.").await?;
        }

        Ok(())
    }

    /// Tears down an aborted or failed transfer, classifying `errno` into
    /// the 4xx/5xx reply family.
    ///
    /// The OOB byte and the peer's close race; whichever wins, the
    /// teardown is the same, and `POST_ABORT` records a signal win. The
    /// transfer counters survive until [`DataChannel::cleanup`].
    pub async fn abort<R: ReplySink>(
        &mut self,
        reply: &mut R,
        errno: i32,
        quiet: bool,
    ) -> io::Result<()> {
        let true_abort = self.flags.contains(SessionFlags::ABORT)
            || self.abort.as_ref().is_some_and(|f| f.is_aborted());

        abort::disarm();
        self.abort = None;

        if let Some(conn) = self.conn.take() {
            netio::lingering_close(conn, self.tunables.linger());
        }

        self.timers.reset(TimerKind::NoXfer);
        self.timers.remove(TimerKind::Stalled);
        self.timers.reset(TimerKind::Idle);

        self.flags.clear(
            SessionFlags::ABORT
                | SessionFlags::XFER
                | SessionFlags::PASSIVE
                | SessionFlags::ASCII_OVERRIDE,
        );

        if !quiet {
            let (code, msg) = abort_reply(errno);
            reply.add_err(code, &msg).await?;
        }

        if true_abort {
            self.flags.set(SessionFlags::POST_ABORT);
        }

        Ok(())
    }

    /// Drops every per-transfer resource. Counters and scratch vanish
    /// here, not in `close`/`abort`, so post-transfer logging can still
    /// read them.
    pub fn cleanup(&mut self) {
        abort::disarm();
        self.abort = None;

        if let Some(conn) = self.conn.take() {
            netio::lingering_close(conn, self.tunables.linger());
        }

        self.xfer = None;
    }

    /// Abandons any data connection immediately and clears transfer flags.
    pub fn reset(&mut self) {
        self.conn = None;
        self.pasv = None;
        self.flags.clear(
            SessionFlags::ABORT
                | SessionFlags::XFER
                | SessionFlags::PASSIVE
                | SessionFlags::ASCII_OVERRIDE,
        );
    }

    /// Bytes moved for the current transfer.
    pub fn xfer_bytes(&self) -> u64 {
        self.xfer.as_ref().map(|x| x.total_bytes).unwrap_or(0)
    }

    /// Bytes moved across the whole session.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn is_transferring(&self) -> bool {
        self.flags.contains(SessionFlags::XFER)
    }

    /// When the current transfer went on the wire.
    pub fn start_time(&self) -> Option<Instant> {
        self.xfer.as_ref().and_then(|x| x.start_time)
    }
}

/// Maps an errno observed during transfer to its FTP reply.
fn abort_reply(errno: i32) -> (ReplyCode, String) {
    let strerror = |e: i32| io::Error::from_raw_os_error(e).to_string();

    match errno {
        0 => (ReplyCode::TransferAborted, "Data connection closed.".to_owned()),
        libc::ENXIO => (ReplyCode::LocalError, "Unexpected streams hangup.".to_owned()),
        libc::EAGAIN | libc::ENOMEM => {
            (ReplyCode::LocalError, "Insufficient memory or file locked.".to_owned())
        }
        libc::ETXTBSY | libc::EBUSY => (ReplyCode::LocalError, strerror(errno)),
        libc::ENOSPC => (ReplyCode::InsufficientStorage, strerror(errno)),
        libc::EDQUOT | libc::EFBIG => (ReplyCode::ExceededStorage, strerror(errno)),
        e if is_io_errno(e) => (ReplyCode::LocalError, strerror(errno)),
        e if is_lost_link_errno(e) => {
            (ReplyCode::FileActionNotTaken, "Link to file server lost.".to_owned())
        }
        _ => {
            let detail = if errno > 0 {
                strerror(errno)
            } else {
                format!("Unknown or out of range errno [{}].", errno)
            };
            (ReplyCode::TransferAborted, format!("Transfer aborted.  {}", detail))
        }
    }
}

fn is_io_errno(errno: i32) -> bool {
    matches!(
        errno,
        libc::EIO | libc::EPIPE | libc::EPROTO | libc::ESPIPE | libc::EFAULT | libc::EDEADLK
    ) || is_io_errno_sysv(errno)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn is_io_errno_sysv(errno: i32) -> bool {
    matches!(errno, libc::ECOMM | libc::EXFULL | libc::ENOSR | libc::ETIME)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn is_io_errno_sysv(_errno: i32) -> bool {
    false
}

fn is_lost_link_errno(errno: i32) -> bool {
    matches!(
        errno,
        libc::ECONNRESET
            | libc::ECONNABORTED
            | libc::ETIMEDOUT
            | libc::ENETRESET
            | libc::ENOLINK
            | libc::ENOLCK
            | libc::ESTALE
    ) || is_lost_link_errno_sysv(errno)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn is_lost_link_errno_sysv(errno: i32) -> bool {
    matches!(errno, libc::ESRMNT | libc::EREMCHG)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn is_lost_link_errno_sysv(_errno: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_reply_classification() {
        let (code, msg) = abort_reply(0);
        assert_eq!(code, ReplyCode::TransferAborted);
        assert_eq!(msg, "Data connection closed.");

        let (code, _) = abort_reply(libc::ENOSPC);
        assert_eq!(code, ReplyCode::InsufficientStorage);

        let (code, msg) = abort_reply(libc::ECONNRESET);
        assert_eq!(code, ReplyCode::FileActionNotTaken);
        assert_eq!(msg, "Link to file server lost.");

        let (code, _) = abort_reply(libc::EDQUOT);
        assert_eq!(code, ReplyCode::ExceededStorage);

        let (code, _) = abort_reply(libc::EPIPE);
        assert_eq!(code, ReplyCode::LocalError);

        let (code, msg) = abort_reply(libc::ENXIO);
        assert_eq!(code, ReplyCode::LocalError);
        assert_eq!(msg, "Unexpected streams hangup.");

        let (code, msg) = abort_reply(-1);
        assert_eq!(code, ReplyCode::TransferAborted);
        assert!(msg.starts_with("Transfer aborted."));
        assert!(msg.contains("Unknown or out of range errno"));
    }

    #[test]
    fn flags_follow_lifecycle_on_reset() {
        let mut chan = DataChannel::new(Tunables::default());
        chan.flags.set(SessionFlags::PASSIVE | SessionFlags::XFER | SessionFlags::ABORT);
        chan.reset();
        assert!(!chan.flags.intersects(
            SessionFlags::PASSIVE | SessionFlags::XFER | SessionFlags::ABORT
        ));
    }

    #[test]
    fn init_reuses_existing_transfer_state() {
        let mut chan = DataChannel::new(Tunables::default());
        chan.init("a.txt", Direction::Write);
        chan.set_xfer_type(XferType::Unique);
        chan.init("a.txt", Direction::Read);

        let xfer = chan.xfer.as_ref().unwrap();
        assert_eq!(xfer.direction, Direction::Read);
        // Re-init keeps the scratch, including the transfer type.
        assert_eq!(xfer.xfer_type, XferType::Unique);
    }
}
