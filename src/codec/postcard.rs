use crate::{Envelope, EnvelopeCodec, VouchError, codec::WireEnvelope};

/// Compact varint encoding; the default on both ends of the socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl EnvelopeCodec for PostcardCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, VouchError> {
        ::postcard::to_allocvec(&WireEnvelope::from(envelope)).map_err(VouchError::encode)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, VouchError> {
        let wire: WireEnvelope = ::postcard::from_bytes(bytes).map_err(VouchError::decode)?;
        Envelope::try_from(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VouchCode, codec::WirePayload};

    #[test]
    fn test_postcard_roundtrip_known_kinds() {
        let codec = PostcardCodec;
        let envelopes = [
            Envelope::heartbeat_request(1),
            Envelope::heartbeat_response(u64::MAX),
            Envelope::authorize_process_request(7, 2000, 1000),
            Envelope::authorize_process_response(0),
        ];

        for env in envelopes {
            let bytes = codec.encode(&env).expect("encode");
            assert_eq!(codec.decode(&bytes).expect("decode"), env);
        }
    }

    #[test]
    fn test_postcard_heartbeat_is_compact() {
        let bytes = PostcardCodec.encode(&Envelope::heartbeat_request(1)).unwrap();
        // seq varint + tag + option marker + variant index
        assert_eq!(bytes.len(), 4);
    }

    #[test]
    fn test_postcard_mismatched_tag_rejected() {
        let wire = WireEnvelope {
            seq_num: 9,
            payload_type: 2,
            payload: Some(WirePayload::HeartbeatRequest),
        };
        let bytes = ::postcard::to_allocvec(&wire).unwrap();

        let err = PostcardCodec.decode(&bytes).unwrap_err();
        assert_eq!(err.code, VouchCode::UnreadablePayload);
    }

    #[test]
    fn test_postcard_decode_error() {
        let err = PostcardCodec.decode(&[0xFF, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(err.code, VouchCode::Decode);
    }
}
