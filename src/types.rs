use std::path::PathBuf;

/// Process id as reported by the kernel.
pub type Pid = u32;

/// Default path the proxy listens on.
pub const DEFAULT_LISTEN_PATH: &str = "/tmp/proxy";

/// Default path every reply is sent to.
pub const DEFAULT_PEER_PATH: &str = "/tmp/process_monitor";

/// Sender identity taken from the `SCM_CREDENTIALS` record of one datagram.
///
/// Only `pid` takes part in authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredential {
    pub pid: Pid,
    pub uid: u32,
    pub gid: u32,
}

impl core::fmt::Display for PeerCredential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pid={} uid={} gid={}", self.pid, self.uid, self.gid)
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_path: PathBuf,

    /// Fixed destination for every reply. Never derived from the sender.
    pub peer_path: PathBuf,

    /// Receive buffer for one datagram payload. Longer datagrams are truncated
    /// by the kernel and will then fail to decode.
    pub max_payload_len: usize,

    /// Receive buffer for ancillary data. Must fit at least one
    /// `CMSG_SPACE(sizeof(struct ucred))`.
    pub max_control_len: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_path: PathBuf::from(DEFAULT_LISTEN_PATH),
            peer_path: PathBuf::from(DEFAULT_PEER_PATH),
            max_payload_len: 1024,
            max_control_len: 128,
        }
    }
}

impl ProxyConfig {
    pub fn new(listen_path: impl Into<PathBuf>, peer_path: impl Into<PathBuf>) -> Self {
        Self {
            listen_path: listen_path.into(),
            peer_path: peer_path.into(),
            ..Default::default()
        }
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    pub fn with_max_control_len(mut self, len: usize) -> Self {
        self.max_control_len = len;
        self
    }
}
