//! Open file handles.
//!
//! An [`Fh`] couples the open file with the driver that produced it, so
//! descriptor-level operations never re-route. The handle carries an
//! optional read-ahead buffer backing the line-oriented reads used for
//! text files (welcome messages, `.message` files and the like).

use std::io::SeekFrom;
use std::sync::Arc;

use super::driver::{FsDriver, FsError, FsFile, FsResult, Stat};
use crate::config::DEFAULT_BUFFER_SIZE;

struct LineBuf {
    data: Vec<u8>,
    pos: usize,
    fill: usize,
}

/// An open file: the driver that produced it, the file object, and the
/// path it was opened under.
pub struct Fh {
    path: String,
    fs: Arc<dyn FsDriver>,
    file: Box<dyn FsFile>,
    buf: Option<LineBuf>,
}

impl Fh {
    pub(super) fn new(path: &str, fs: Arc<dyn FsDriver>, file: Box<dyn FsFile>) -> Self {
        Self { path: path.to_owned(), fs, file, buf: None }
    }

    /// The path this handle was opened under, as given by the caller.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name of the driver backing this handle.
    pub fn driver_name(&self) -> &str {
        self.fs.name()
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.file.read(buf).await
    }

    pub async fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        self.file.write(buf).await
    }

    /// Writes the whole buffer, retrying partial writes.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> FsResult<()> {
        while !buf.is_empty() {
            let n = self.file.write(buf).await?;
            if n == 0 {
                return Err(FsError::Io(libc::EIO));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    pub async fn lseek(&mut self, pos: SeekFrom) -> FsResult<u64> {
        self.file.lseek(pos).await
    }

    pub async fn fstat(&mut self) -> FsResult<Stat> {
        self.file.fstat().await
    }

    pub async fn ftruncate(&mut self, len: u64) -> FsResult<()> {
        self.file.ftruncate(len).await
    }

    /// Raw descriptor for zero-copy dispatch, if the backing file has one.
    #[cfg(unix)]
    pub fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        self.file.raw_fd()
    }

    /// Closes the handle, consuming it.
    pub async fn close(mut self) -> FsResult<()> {
        self.file.close().await
    }

    /// Reads one line (newline included) into `out`, through the
    /// read-ahead buffer. Returns `Ok(None)` at end of file.
    pub async fn gets(&mut self, out: &mut [u8]) -> FsResult<Option<usize>> {
        if out.is_empty() {
            return Err(FsError::Inval);
        }

        let mut buf = self.buf.take().unwrap_or_else(|| LineBuf {
            data: vec![0; DEFAULT_BUFFER_SIZE],
            pos: 0,
            fill: 0,
        });

        let res = Self::gets_buffered(&mut *self.file, &mut buf, out).await;
        self.buf = Some(buf);
        res
    }

    async fn gets_buffered(
        file: &mut dyn FsFile,
        buf: &mut LineBuf,
        out: &mut [u8],
    ) -> FsResult<Option<usize>> {
        let mut written = 0;

        while written < out.len() {
            if buf.pos >= buf.fill {
                buf.pos = 0;
                buf.fill = 0;

                let n = file.read(&mut buf.data).await?;
                if n == 0 {
                    return Ok((written > 0).then_some(written));
                }
                buf.fill = n;
            }

            while written < out.len() && buf.pos < buf.fill {
                let byte = buf.data[buf.pos];
                out[written] = byte;
                written += 1;
                buf.pos += 1;

                if byte == b'\n' {
                    return Ok(Some(written));
                }
            }
        }

        Ok(Some(written))
    }

    /// Reads one logical line, joining backslash-continued physical lines
    /// and counting them into `lineno`. Returns `Ok(None)` at end of file.
    pub async fn getline(&mut self, lineno: &mut u32) -> FsResult<Option<String>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; DEFAULT_BUFFER_SIZE];

        loop {
            let Some(n) = self.gets(&mut chunk).await? else {
                return Ok((!out.is_empty())
                    .then(|| String::from_utf8_lossy(&out).into_owned()));
            };

            let line = &chunk[..n];

            if line.ends_with(b"\n") {
                *lineno += 1;

                if line.len() >= 2 && line[line.len() - 2] == b'\\' {
                    out.extend_from_slice(&line[..line.len() - 2]);
                    continue;
                }

                out.extend_from_slice(line);
                return Ok(Some(String::from_utf8_lossy(&out).into_owned()));
            }

            // Overlong physical line; hand back what we have.
            out.extend_from_slice(line);
            return Ok(Some(String::from_utf8_lossy(&out).into_owned()));
        }
    }

    /// Writes a full string through the handle.
    pub async fn puts(&mut self, text: &str) -> FsResult<()> {
        self.write_all(text.as_bytes()).await
    }
}
