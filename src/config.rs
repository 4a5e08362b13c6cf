//! Tunable knobs for the data-transfer engine and filesystem router.
//!
//! The embedding server parses its own configuration file; this module only
//! defines the subset of settings the transfer core consumes, loadable from
//! a TOML fragment. A timeout of `0` disables the corresponding timer.

use std::time::Duration;

use serde::Deserialize;

/// Default size of the per-transfer translation buffer, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Settings consumed by [`crate::data::DataChannel`] and friends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Size of the transfer buffer. The ASCII writer may grow past this
    /// for a single call when inserting carriage returns.
    pub buffer_size: usize,
    /// Seconds a transfer may sit without moving a byte before the
    /// session is terminated. `0` disables stall supervision.
    pub timeout_stalled: u64,
    /// Seconds allowed between two transfers. `0` disables.
    pub timeout_noxfer: u64,
    /// Seconds of total command/data inactivity allowed. `0` disables.
    pub timeout_idle: u64,
    /// Seconds to linger on data-connection close, waiting for the peer
    /// to acknowledge outstanding bytes.
    pub timeout_linger: u64,
    /// Receive buffer override for upload data connections.
    pub tcp_rcvbuf: Option<usize>,
    /// Send buffer override for download data connections.
    pub tcp_sndbuf: Option<usize>,
    /// TCP maximum segment size hint for data connections.
    pub tcp_mss: Option<u32>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout_stalled: 3600,
            timeout_noxfer: 300,
            timeout_idle: 600,
            timeout_linger: 10,
            tcp_rcvbuf: None,
            tcp_sndbuf: None,
            tcp_mss: None,
        }
    }
}

impl Tunables {
    /// Parses a TOML fragment, filling unset fields with defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn stalled(&self) -> Option<Duration> {
        nonzero_secs(self.timeout_stalled)
    }

    pub fn noxfer(&self) -> Option<Duration> {
        nonzero_secs(self.timeout_noxfer)
    }

    pub fn idle(&self) -> Option<Duration> {
        nonzero_secs(self.timeout_idle)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_secs(self.timeout_linger)
    }
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let t = Tunables::from_toml("timeout_stalled = 60\n").unwrap();
        assert_eq!(t.timeout_stalled, 60);
        assert_eq!(t.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(t.stalled(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_timeout_disables_timer() {
        let t = Tunables::from_toml("timeout_stalled = 0\ntimeout_idle = 0\n").unwrap();
        assert_eq!(t.stalled(), None);
        assert_eq!(t.idle(), None);
        assert!(t.noxfer().is_some());
    }

    #[test]
    fn buffer_override() {
        let t = Tunables::from_toml("buffer_size = 4096\ntcp_sndbuf = 65536\n").unwrap();
        assert_eq!(t.buffer_size, 4096);
        assert_eq!(t.tcp_sndbuf, Some(65536));
    }
}
