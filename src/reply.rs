//! Control-connection reply plumbing.
//!
//! The control protocol proper lives in the embedding server; the transfer
//! engine only needs a narrow sink to emit the RFC 959 replies tied to the
//! data connection (150/226/425/426 and the abort family).

use std::io;

use async_trait::async_trait;
use num_derive::{FromPrimitive, ToPrimitive};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Reply codes emitted by the data-connection engine (RFC 959 §4.2).
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ReplyCode {
    /// File status okay; about to open data connection.
    FileStatusOk = 150,
    /// Closing data connection; requested file action successful.
    ClosingData = 226,
    /// Can't open data connection.
    CantOpenData = 425,
    /// Connection closed; transfer aborted.
    TransferAborted = 426,
    /// Requested file action not taken.
    FileActionNotTaken = 450,
    /// Requested action aborted: local error in processing.
    LocalError = 451,
    /// Requested action not taken; insufficient storage space.
    InsufficientStorage = 452,
    /// Requested file action aborted; exceeded storage allocation.
    ExceededStorage = 552,
}

impl ReplyCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Where the engine's replies go.
///
/// `send` flushes a reply immediately; `add` and `add_err` queue a reply
/// to ride along with the final response of the current command, which is
/// how the surrounding command dispatcher batches its output.
#[async_trait]
pub trait ReplySink: Send {
    async fn send(&mut self, code: ReplyCode, msg: &str) -> io::Result<()>;

    async fn add(&mut self, code: ReplyCode, msg: &str) -> io::Result<()>;

    async fn add_err(&mut self, code: ReplyCode, msg: &str) -> io::Result<()>;
}

/// Minimal sink that writes `NNN text\r\n` straight to a stream.
///
/// Suitable for tests and for embedders without reply batching.
pub struct WireSink<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin + Send> WireSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    async fn write_line(&mut self, code: ReplyCode, msg: &str) -> io::Result<()> {
        let line = format!("{} {}\r\n", code.as_u32(), msg);
        self.out.write_all(line.as_bytes()).await?;
        self.out.flush().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ReplySink for WireSink<W> {
    async fn send(&mut self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.write_line(code, msg).await
    }

    async fn add(&mut self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.write_line(code, msg).await
    }

    async fn add_err(&mut self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.write_line(code, msg).await
    }
}
