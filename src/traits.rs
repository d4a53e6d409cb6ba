use crate::{Envelope, VouchError};

/// Turns envelopes into datagram bytes and back.
///
/// Both ends of the socket must agree on the codec.
pub trait EnvelopeCodec: core::fmt::Debug + Copy + Send + Sync + 'static {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, VouchError>;
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, VouchError>;
}
