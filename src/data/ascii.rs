//! RFC 959 ASCII representation translation.
//!
//! The reader strips the CR of every CRLF coming off the wire; the writer
//! guarantees every LF going onto the wire is preceded by CR, growing the
//! transfer buffer when the inserted CRs do not fit. One byte of headroom
//! in front of the buffer is reserved for a CR prepended to a leading LF.

/// The per-transfer translation buffer.
///
/// Content nominally starts at offset 1, keeping `data[0]` free; the
/// writer claims that byte when the first content byte is a bare LF.
pub(super) struct XferBuf {
    data: Vec<u8>,
    start: usize,
}

impl XferBuf {
    pub(super) fn new(capacity: usize) -> Self {
        Self { data: vec![0; capacity + 1], start: 1 }
    }

    /// Usable capacity from the nominal content start.
    pub(super) fn capacity(&self) -> usize {
        self.data.len() - 1
    }

    /// Copies a client chunk in, resetting the headroom.
    pub(super) fn load(&mut self, chunk: &[u8]) {
        if chunk.len() + 1 > self.data.len() {
            self.data.resize(chunk.len() + 1, 0);
        }
        self.start = 1;
        self.data[1..1 + chunk.len()].copy_from_slice(chunk);
    }

    pub(super) fn slice(&self, len: usize) -> &[u8] {
        &self.data[self.start..self.start + len]
    }

    pub(super) fn content_mut(&mut self, len: usize) -> &mut [u8] {
        &mut self.data[self.start..self.start + len]
    }

    /// Free space past `offset` content bytes, for appending reads.
    pub(super) fn space_mut(&mut self, offset: usize) -> &mut [u8] {
        let end = self.start + self.capacity();
        &mut self.data[self.start + offset..end]
    }

    /// Moves `count` carried bytes at `from` back to the content head.
    pub(super) fn carry_to_head(&mut self, from: usize, count: usize) {
        self.data.copy_within(self.start + from..self.start + from + count, self.start);
    }
}

/// Strips CRs that precede LFs, in place.
///
/// Returns `(emitted, carry)`: `emitted` bytes of translated output sit at
/// the head of `buf`, and `carry` (0 or 1) trailing bytes follow them, a
/// lone CR at the end of the buffer that cannot be classified until the
/// next byte arrives.
pub(super) fn xlate_ascii_read(buf: &mut [u8], len: usize) -> (usize, usize) {
    let mut dst = 0;
    let mut src = 0;
    let mut carry = 0;

    while src < len {
        if buf[src] != b'\r' {
            buf[dst] = buf[src];
            dst += 1;
            src += 1;
        } else if src + 1 == len {
            // Keep the trailing CR for the next read to classify.
            buf[dst] = b'\r';
            carry = 1;
            src += 1;
        } else if buf[src + 1] == b'\n' {
            src += 1;
        } else {
            buf[dst] = buf[src];
            dst += 1;
            src += 1;
        }
    }

    (dst, carry)
}

/// Inserts a CR before every bare LF, growing the buffer when needed.
///
/// Returns `(len, expand)`: the translated length and how many CRs were
/// inserted. `expand` is excluded from byte accounting so the client is
/// billed for what it supplied, not what went on the wire.
pub(super) fn xlate_ascii_write(buf: &mut XferBuf, len: usize) -> (usize, usize) {
    let mut lfcount = 0;
    {
        let content = buf.slice(len);
        for (i, &b) in content.iter().enumerate() {
            if b == b'\n' && (i == 0 || content[i - 1] != b'\r') {
                lfcount += 1;
            }
        }
    }

    if lfcount == 0 {
        return (len, 0);
    }

    // Grow when the inserted CRs do not fit, preserving the headroom byte.
    if buf.data.len() - buf.start < len + lfcount {
        let mut grown = vec![0u8; len + lfcount + 1];
        grown[1..1 + len].copy_from_slice(&buf.data[buf.start..buf.start + len]);
        buf.data = grown;
        buf.start = 1;
    }

    let mut len = len;
    let mut expand = 0;

    // A leading bare LF takes the reserved headroom byte.
    if buf.data[buf.start] == b'\n' {
        buf.start -= 1;
        buf.data[buf.start] = b'\r';
        len += 1;
        expand += 1;
        lfcount -= 1;
    }

    let mut i = 1;
    while i < len && lfcount > 0 {
        let at = buf.start + i;
        if buf.data[at] == b'\n' && buf.data[at - 1] != b'\r' {
            buf.data.copy_within(at..buf.start + len, at + 1);
            buf.data[at] = b'\r';
            len += 1;
            expand += 1;
            lfcount -= 1;
            i += 2;
        } else {
            i += 1;
        }
    }

    (len, expand)
}
