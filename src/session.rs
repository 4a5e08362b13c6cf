//! Session-wide transfer state shared between the command handlers and the
//! data-connection engine.

/// Bit set describing the session's transfer disposition.
///
/// The flags mirror the wire-visible state of the control connection: the
/// representation type negotiated by `TYPE`, whether `PASV` has been issued,
/// and the progress of the current data transfer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SessionFlags(u32);

impl SessionFlags {
    /// `TYPE A` is in effect; line endings are normalized on the wire.
    pub const ASCII: u32 = 0x0001;
    /// ASCII translation forced for this one transfer (directory listings).
    pub const ASCII_OVERRIDE: u32 = 0x0002;
    /// `PASV` was issued; a listening data socket is pending.
    pub const PASSIVE: u32 = 0x0004;
    /// A data transfer is in progress.
    pub const XFER: u32 = 0x0008;
    /// Out-of-band abort observed for the current transfer.
    pub const ABORT: u32 = 0x0010;
    /// The abort won the race against the peer's close.
    pub const POST_ABORT: u32 = 0x0020;

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// True if any of the given bits are set.
    pub fn intersects(self, flags: u32) -> bool {
        self.0 & flags != 0
    }

    pub fn set(&mut self, flags: u32) {
        self.0 |= flags;
    }

    pub fn clear(&mut self, flags: u32) {
        self.0 &= !flags;
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// Direction of the data connection, from the server's point of view.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Upload: the server reads from the data connection.
    Read,
    /// Download: the server writes to the data connection.
    Write,
}

/// How the destination file of a store was chosen.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum XferType {
    #[default]
    Normal,
    Append,
    /// `STOU`; dictates the RFC 1123 `150 FILE: <path>` reply shape.
    Unique,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_set_and_clear() {
        let mut flags = SessionFlags::default();
        flags.set(SessionFlags::ASCII | SessionFlags::PASSIVE);
        assert!(flags.contains(SessionFlags::ASCII));
        assert!(flags.intersects(SessionFlags::ASCII | SessionFlags::XFER));
        assert!(!flags.contains(SessionFlags::XFER));

        flags.clear(SessionFlags::PASSIVE);
        assert!(!flags.contains(SessionFlags::PASSIVE));
        assert!(flags.contains(SessionFlags::ASCII));
    }
}
