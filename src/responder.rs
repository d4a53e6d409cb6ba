use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::net::UnixDatagram;
use tracing::debug;

use crate::{Envelope, EnvelopeCodec, VouchError};

/// Sends replies from the listening socket to the one fixed peer.
#[derive(Debug, Clone)]
pub struct Responder<C: EnvelopeCodec> {
    socket: Arc<UnixDatagram>,
    peer: PathBuf,
    codec: C,
}

impl<C: EnvelopeCodec> Responder<C> {
    pub fn new(socket: Arc<UnixDatagram>, peer: impl Into<PathBuf>, codec: C) -> Self {
        Self { socket, peer: peer.into(), codec }
    }

    pub fn peer(&self) -> &Path {
        &self.peer
    }

    /// Encodes `reply` and sends it as a single datagram. Not retried.
    pub async fn send(&self, reply: &Envelope) -> Result<(), VouchError> {
        let bytes = self.codec.encode(reply)?;
        self.socket
            .send_to(&bytes, &self.peer)
            .await
            .map_err(|e| VouchError::send(&self.peer, e))?;

        debug!(seq = reply.seq_num, kind = %reply.payload_type(), len = bytes.len(), "reply sent");
        Ok(())
    }
}
