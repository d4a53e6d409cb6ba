#![cfg(feature = "cbor")]

use crate::{Envelope, EnvelopeCodec, VouchError, codec::WireEnvelope};

/// Self-describing alternative for peers that already speak CBOR.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl EnvelopeCodec for CborCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, VouchError> {
        ::serde_cbor::to_vec(&WireEnvelope::from(envelope)).map_err(VouchError::cbor_encode)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, VouchError> {
        let wire: WireEnvelope = ::serde_cbor::from_slice(bytes).map_err(VouchError::cbor_decode)?;
        Envelope::try_from(wire)
    }
}
