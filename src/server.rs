//! Datagram listener.
//!
//! One task receives; every datagram gets its own spawned task that verifies
//! the sender, decodes, dispatches and replies. There is no cap on in-flight
//! handlers and no backpressure: a flood of datagrams turns into a flood of
//! tasks. Replies can leave in any order, the sequence number correlates them.

use std::{
    io::{self, IoSliceMut},
    os::fd::{AsRawFd, RawFd},
    path::Path,
    sync::Arc,
};

use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg, setsockopt, sockopt};
use tokio::{io::Interest, net::UnixDatagram};
use tracing::{debug, info, warn};

use crate::{
    AccessStore, Dispatcher, EnvelopeCodec, ProxyConfig, Responder, VouchError,
    codec::DefaultCodec,
    credentials::{self, Verdict},
};

/// One datagram as read by `recvmsg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Received {
    pub payload_len: usize,
    pub control: Vec<ControlMessageOwned>,
    pub truncated: bool,
}

/// Reads one datagram together with its ancillary records. `cmsg_buf` is
/// sized by its capacity, not its length.
pub(crate) fn recv_with_credentials(
    fd: RawFd,
    payload: &mut [u8],
    cmsg_buf: &mut Vec<u8>,
) -> io::Result<Received> {
    let mut iov = [IoSliceMut::new(payload)];
    let msg = recvmsg::<()>(fd, &mut iov, Some(cmsg_buf), MsgFlags::MSG_CMSG_CLOEXEC)?;

    let control = msg
        .cmsgs()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("control data truncated: {e}")))?
        .collect();

    Ok(Received {
        payload_len: msg.bytes,
        control,
        truncated: msg.flags.contains(MsgFlags::MSG_TRUNC),
    })
}

fn remove_stale_socket(path: &Path) -> Result<(), VouchError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VouchError::bind(path, e)),
    }
}

struct Handler<C: EnvelopeCodec> {
    dispatcher: Dispatcher,
    responder: Responder<C>,
    codec: C,
}

impl<C: EnvelopeCodec> Handler<C> {
    async fn handle(&self, payload: Vec<u8>, control: Vec<ControlMessageOwned>) -> Result<(), VouchError> {
        if control.is_empty() {
            return Err(VouchError::missing_credentials());
        }
        if payload.is_empty() {
            return Err(VouchError::empty_payload());
        }
        debug!(payload_len = payload.len(), control_len = control.len(), "handling message");

        let credential = match credentials::verify(&control, self.dispatcher.store())? {
            Verdict::Authorized(c) => c,
            Verdict::Unauthorized(c) => return Err(VouchError::unauthorized(c.pid)),
        };

        let request = self.codec.decode(&payload)?;
        debug!(pid = credential.pid, seq = request.seq_num, kind = %request.payload_type(), "request decoded");

        let reply = self.dispatcher.dispatch(request)?;
        self.responder.send(&reply).await
    }
}

/// Bound proxy socket plus everything a message handler needs.
pub struct Proxy<C: EnvelopeCodec = DefaultCodec> {
    socket: Arc<UnixDatagram>,
    config: ProxyConfig,
    store: Arc<AccessStore>,
    handler: Arc<Handler<C>>,
}

impl Proxy<DefaultCodec> {
    /// Binds with the default codec. Must be called inside a tokio runtime.
    pub fn bind(config: ProxyConfig, store: Arc<AccessStore>) -> Result<Self, VouchError> {
        Self::bind_with_codec(config, store, DefaultCodec::default())
    }
}

impl<C: EnvelopeCodec> Proxy<C> {
    /// Removes any stale file at the listen path, binds, and turns on
    /// `SO_PASSCRED`. Any failure here is fatal for the caller.
    pub fn bind_with_codec(
        config: ProxyConfig,
        store: Arc<AccessStore>,
        codec: C,
    ) -> Result<Self, VouchError> {
        let path = &config.listen_path;
        remove_stale_socket(path)?;

        let socket = UnixDatagram::bind(path).map_err(|e| VouchError::bind(path, e))?;
        setsockopt(&socket, sockopt::PassCred, &true).map_err(VouchError::pass_cred)?;

        info!(
            listen = %path.display(),
            peer = %config.peer_path.display(),
            "proxy socket bound"
        );

        let socket = Arc::new(socket);
        let handler = Arc::new(Handler {
            dispatcher: Dispatcher::new(Arc::clone(&store)),
            responder: Responder::new(Arc::clone(&socket), config.peer_path.clone(), codec),
            codec,
        });

        Ok(Self { socket, config, store, handler })
    }

    pub fn store(&self) -> &Arc<AccessStore> {
        &self.store
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn listen_path(&self) -> &Path {
        &self.config.listen_path
    }

    /// Receive loop. Never returns; receive errors are logged and skipped.
    pub async fn run(&self) {
        loop {
            match self.recv().await {
                Ok((payload, control)) => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = handler.handle(payload, control).await {
                            warn!(error = %e, "dropping message");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to receive message"),
            }
        }
    }

    /// Runs one already-received datagram through verify, decode, dispatch
    /// and reply, on the caller's task.
    pub async fn handle_datagram(
        &self,
        payload: Vec<u8>,
        control: Vec<ControlMessageOwned>,
    ) -> Result<(), VouchError> {
        self.handler.handle(payload, control).await
    }

    async fn recv(&self) -> Result<(Vec<u8>, Vec<ControlMessageOwned>), VouchError> {
        let mut payload = vec![0u8; self.config.max_payload_len];
        let mut cmsg_buf = Vec::with_capacity(self.config.max_control_len);
        let fd = self.socket.as_raw_fd();

        let received = self
            .socket
            .async_io(Interest::READABLE, || recv_with_credentials(fd, &mut payload, &mut cmsg_buf))
            .await?;

        if received.truncated {
            debug!(max_payload_len = self.config.max_payload_len, "datagram truncated");
        }

        payload.truncate(received.payload_len);
        Ok((payload, received.control))
    }

    /// Removes the listening socket's file. Missing file is not an error.
    pub fn cleanup(&self) -> Result<(), VouchError> {
        match std::fs::remove_file(self.listen_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl<C: EnvelopeCodec> Drop for Proxy<C> {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!(error = %e, "failed to remove proxy socket");
        }
    }
}
