//! Peer side of the proxy protocol.
//!
//! A supervising process binds its own datagram socket, usually at the path
//! the proxy replies to, and sends requests from there. No credential record
//! has to be attached by hand: the proxy's `SO_PASSCRED` makes the kernel add
//! one to every datagram it receives. The client turns `SO_PASSCRED` on for
//! its own socket as well, so replies can be checked against the pid that
//! was expected to send them.

use std::{
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use nix::sys::socket::{setsockopt, sockopt};
use tokio::{io::Interest, net::UnixDatagram};
use tracing::{debug, warn};

use crate::{
    Envelope, EnvelopeCodec, PeerCredential, Pid, VouchError, codec::DefaultCodec, credentials,
    server::recv_with_credentials,
};

const RECV_BUF_LEN: usize = 1024;

pub struct ProxyClient<C: EnvelopeCodec = DefaultCodec> {
    socket: UnixDatagram,
    local_path: PathBuf,
    proxy_path: PathBuf,
    codec: C,
    next_seq: AtomicU64,
}

impl ProxyClient<DefaultCodec> {
    pub fn bind(local_path: impl Into<PathBuf>, proxy_path: impl Into<PathBuf>) -> Result<Self, VouchError> {
        Self::bind_with_codec(local_path, proxy_path, DefaultCodec::default())
    }
}

impl<C: EnvelopeCodec> ProxyClient<C> {
    /// Binds at `local_path`, replacing any stale file there.
    pub fn bind_with_codec(
        local_path: impl Into<PathBuf>,
        proxy_path: impl Into<PathBuf>,
        codec: C,
    ) -> Result<Self, VouchError> {
        let local_path = local_path.into();
        match std::fs::remove_file(&local_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(VouchError::bind(&local_path, e)),
        }
        let socket = UnixDatagram::bind(&local_path).map_err(|e| VouchError::bind(&local_path, e))?;
        setsockopt(&socket, sockopt::PassCred, &true).map_err(VouchError::pass_cred)?;

        Ok(Self {
            socket,
            local_path,
            proxy_path: proxy_path.into(),
            codec,
            next_seq: AtomicU64::new(1),
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn proxy_path(&self) -> &Path {
        &self.proxy_path
    }

    fn take_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<(), VouchError> {
        self.send_to(&self.proxy_path, envelope).await
    }

    /// Sends to any process that speaks the protocol, not just the proxy.
    pub async fn send_to(&self, dest: &Path, envelope: &Envelope) -> Result<(), VouchError> {
        let bytes = self.codec.encode(envelope)?;
        self.socket.send_to(&bytes, dest).await.map_err(|e| VouchError::send(dest, e))?;
        debug!(dest = %dest.display(), seq = envelope.seq_num, kind = %envelope.payload_type(), "request sent");
        Ok(())
    }

    /// Sends a heartbeat and returns the sequence number to match the reply on.
    pub async fn heartbeat(&self) -> Result<u64, VouchError> {
        let seq = self.take_seq();
        self.send(&Envelope::heartbeat_request(seq)).await?;
        Ok(seq)
    }

    /// Asks the proxy to trust `new_pid` in place of `old_pid` (0 for none).
    pub async fn authorize_process(&self, new_pid: Pid, old_pid: Pid) -> Result<u64, VouchError> {
        let seq = self.take_seq();
        self.send(&Envelope::authorize_process_request(seq, new_pid, old_pid)).await?;
        Ok(seq)
    }

    /// Waits for the next datagram and decodes it. Replies may arrive out of
    /// request order.
    pub async fn recv(&self) -> Result<Envelope, VouchError> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let n = self.socket.recv(&mut buf).await?;
        self.codec.decode(&buf[..n])
    }

    /// Like [`recv`](Self::recv), also returning who sent the datagram.
    pub async fn recv_with_credential(&self) -> Result<(Envelope, PeerCredential), VouchError> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let mut cmsg_buf = nix::cmsg_space!(libc::ucred);
        let fd = self.socket.as_raw_fd();

        let received = self
            .socket
            .async_io(Interest::READABLE, || recv_with_credentials(fd, &mut buf, &mut cmsg_buf))
            .await?;

        let first = received.control.first().ok_or_else(VouchError::missing_credentials)?;
        let sender = credentials::parse_credentials(first)?;
        let envelope = self.codec.decode(&buf[..received.payload_len])?;
        Ok((envelope, sender))
    }
}

impl<C: EnvelopeCodec> Drop for ProxyClient<C> {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.local_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.local_path.display(), error = %e, "failed to remove client socket"),
        }
    }
}
