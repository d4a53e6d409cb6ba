//! Wire form of [`Envelope`] and the codecs that serialize it.
//!
//! The wire envelope keeps the declared tag and the payload as separate
//! fields: `{ seq_num: u64, payload_type: u8, payload: Option<union> }`.
//! Decoding only exposes a typed [`Envelope`] when the two agree.

use serde::{Deserialize, Serialize};

use crate::{AuthorizeProcess, Envelope, Payload, PayloadType, VouchError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
    pub seq_num: u64,
    pub payload_type: u8,
    pub payload: Option<WirePayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum WirePayload {
    HeartbeatRequest,
    HeartbeatResponse,
    AuthorizeProcessRequest { new_pid: u32, old_pid: u32 },
    AuthorizeProcessResponse,
}

impl WirePayload {
    fn payload_type(&self) -> PayloadType {
        match self {
            Self::HeartbeatRequest => PayloadType::HeartbeatRequest,
            Self::HeartbeatResponse => PayloadType::HeartbeatResponse,
            Self::AuthorizeProcessRequest { .. } => PayloadType::AuthorizeProcessRequest,
            Self::AuthorizeProcessResponse => PayloadType::AuthorizeProcessResponse,
        }
    }
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        let payload = match envelope.payload {
            Payload::HeartbeatRequest => WirePayload::HeartbeatRequest,
            Payload::HeartbeatResponse => WirePayload::HeartbeatResponse,
            Payload::AuthorizeProcessRequest(AuthorizeProcess { new_pid, old_pid }) => {
                WirePayload::AuthorizeProcessRequest { new_pid, old_pid }
            }
            Payload::AuthorizeProcessResponse => WirePayload::AuthorizeProcessResponse,
        };
        Self {
            seq_num: envelope.seq_num,
            payload_type: envelope.payload_type() as u8,
            payload: Some(payload),
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = VouchError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let Some(payload) = wire.payload else {
            return Err(VouchError::unreadable_payload("no payload present"));
        };

        let declared = PayloadType::try_from(wire.payload_type)?;
        if declared == PayloadType::None {
            return Err(VouchError::invalid_request("payload type NONE"));
        }

        let encoded = payload.payload_type();
        if declared != encoded {
            return Err(VouchError::unreadable_payload(format_args!(
                "declared {declared} but encoded {encoded}"
            )));
        }

        let payload = match payload {
            WirePayload::HeartbeatRequest => Payload::HeartbeatRequest,
            WirePayload::HeartbeatResponse => Payload::HeartbeatResponse,
            WirePayload::AuthorizeProcessRequest { new_pid, old_pid } => {
                Payload::AuthorizeProcessRequest(AuthorizeProcess { new_pid, old_pid })
            }
            WirePayload::AuthorizeProcessResponse => Payload::AuthorizeProcessResponse,
        };
        Ok(Envelope { seq_num: wire.seq_num, payload })
    }
}

pub mod postcard;
#[cfg(feature = "cbor")]
pub mod cbor;

pub use self::postcard::PostcardCodec;
#[cfg(feature = "cbor")]
pub use self::cbor::CborCodec;

/// Codec used when none is named.
pub type DefaultCodec = PostcardCodec;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VouchCode;

    fn wire(payload_type: u8, payload: Option<WirePayload>) -> WireEnvelope {
        WireEnvelope { seq_num: 11, payload_type, payload }
    }

    #[test]
    fn test_matching_tag_converts() {
        let env = Envelope::try_from(wire(
            3,
            Some(WirePayload::AuthorizeProcessRequest { new_pid: 200, old_pid: 100 }),
        ))
        .unwrap();
        assert_eq!(env, Envelope::authorize_process_request(11, 200, 100));
    }

    #[test]
    fn test_declared_tag_without_payload_is_unreadable() {
        let err = Envelope::try_from(wire(1, None)).unwrap_err();
        assert_eq!(err.code, VouchCode::UnreadablePayload);
    }

    #[test]
    fn test_tag_mismatch_is_unreadable() {
        let err = Envelope::try_from(wire(
            1,
            Some(WirePayload::AuthorizeProcessRequest { new_pid: 1, old_pid: 0 }),
        ))
        .unwrap_err();
        assert_eq!(err.code, VouchCode::UnreadablePayload);
        assert!(err.to_string().contains("declared HeartbeatRequest but encoded AuthorizeProcessRequest"));
    }

    #[test]
    fn test_none_and_unknown_tags_are_invalid() {
        let none = Envelope::try_from(wire(0, Some(WirePayload::HeartbeatRequest))).unwrap_err();
        assert_eq!(none.code, VouchCode::InvalidRequest);

        let unknown = Envelope::try_from(wire(42, Some(WirePayload::HeartbeatRequest))).unwrap_err();
        assert_eq!(unknown.code, VouchCode::InvalidRequest);
    }

    #[test]
    fn test_wire_tag_follows_variant() {
        let w = WireEnvelope::from(&Envelope::authorize_process_response(5));
        assert_eq!(w.payload_type, PayloadType::AuthorizeProcessResponse as u8);
        assert_eq!(w.payload, Some(WirePayload::AuthorizeProcessResponse));
    }
}
