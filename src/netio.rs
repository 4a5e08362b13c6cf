//! Socket plumbing for the data connection.
//!
//! Socket and protocol options are applied before the data-connection
//! handshake; failures here are advisory and logged rather than fatal, the
//! kernel defaults being a workable fallback.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Applies receive/send buffer overrides to a connected data socket.
#[cfg(unix)]
pub fn set_socket_opts(stream: &TcpStream, rcvbuf: Option<usize>, sndbuf: Option<usize>) {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();

    if let Some(size) = rcvbuf {
        if let Err(err) = setsockopt_usize(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size) {
            debug!("unable to set SO_RCVBUF to {}: {}", size, err);
        }
    }

    if let Some(size) = sndbuf {
        if let Err(err) = setsockopt_usize(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, size) {
            debug!("unable to set SO_SNDBUF to {}: {}", size, err);
        }
    }
}

/// Applies the TCP maximum-segment-size hint, if configured.
#[cfg(unix)]
pub fn set_proto_opts(stream: &TcpStream, mss: Option<u32>) {
    use std::os::fd::AsRawFd;

    if let Some(mss) = mss {
        let fd = stream.as_raw_fd();
        if let Err(err) = setsockopt_usize(fd, libc::IPPROTO_TCP, libc::TCP_MAXSEG, mss as usize) {
            debug!("unable to set TCP_MAXSEG to {}: {}", mss, err);
        }
    }
}

#[cfg(unix)]
fn setsockopt_usize(fd: i32, level: i32, name: i32, value: usize) -> io::Result<()> {
    let value = value as libc::c_int;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Closes the data connection, waiting a bounded time for outstanding
/// bytes to be acknowledged by the peer.
pub fn lingering_close(stream: TcpStream, timeout: Duration) {
    if let Err(err) = stream.set_linger(Some(timeout)) {
        debug!("unable to set SO_LINGER: {}", err);
    }
    drop(stream);
}
