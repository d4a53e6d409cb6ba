//! Typed message envelope exchanged with the proxy.
//!
//! | tag | payload                    | direction     |
//! |-----|----------------------------|---------------|
//! | 0   | NONE                       | never valid   |
//! | 1   | `HeartbeatRequest`         | peer -> proxy |
//! | 2   | `HeartbeatResponse`        | proxy -> peer |
//! | 3   | `AuthorizeProcessRequest`  | peer -> proxy |
//! | 4   | `AuthorizeProcessResponse` | proxy -> peer |

use crate::{Pid, VouchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    None = 0,
    HeartbeatRequest = 1,
    HeartbeatResponse = 2,
    AuthorizeProcessRequest = 3,
    AuthorizeProcessResponse = 4,
}

impl PayloadType {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::HeartbeatRequest => "HeartbeatRequest",
            Self::HeartbeatResponse => "HeartbeatResponse",
            Self::AuthorizeProcessRequest => "AuthorizeProcessRequest",
            Self::AuthorizeProcessResponse => "AuthorizeProcessResponse",
        }
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = VouchError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::None,
            1 => Self::HeartbeatRequest,
            2 => Self::HeartbeatResponse,
            3 => Self::AuthorizeProcessRequest,
            4 => Self::AuthorizeProcessResponse,
            other => return Err(VouchError::invalid_request(format_args!("unknown payload type {other}"))),
        })
    }
}

impl core::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Hand a supervised process's trust from `old_pid` to `new_pid`.
///
/// `old_pid == 0` revokes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizeProcess {
    pub new_pid: Pid,
    pub old_pid: Pid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    HeartbeatRequest,
    HeartbeatResponse,
    AuthorizeProcessRequest(AuthorizeProcess),
    AuthorizeProcessResponse,
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::HeartbeatRequest => PayloadType::HeartbeatRequest,
            Self::HeartbeatResponse => PayloadType::HeartbeatResponse,
            Self::AuthorizeProcessRequest(_) => PayloadType::AuthorizeProcessRequest,
            Self::AuthorizeProcessResponse => PayloadType::AuthorizeProcessResponse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Chosen by the requester and echoed verbatim in the reply.
    pub seq_num: u64,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(seq_num: u64, payload: Payload) -> Self {
        Self { seq_num, payload }
    }

    pub fn heartbeat_request(seq_num: u64) -> Self {
        Self::new(seq_num, Payload::HeartbeatRequest)
    }

    pub fn heartbeat_response(seq_num: u64) -> Self {
        Self::new(seq_num, Payload::HeartbeatResponse)
    }

    pub fn authorize_process_request(seq_num: u64, new_pid: Pid, old_pid: Pid) -> Self {
        Self::new(seq_num, Payload::AuthorizeProcessRequest(AuthorizeProcess { new_pid, old_pid }))
    }

    pub fn authorize_process_response(seq_num: u64) -> Self {
        Self::new(seq_num, Payload::AuthorizeProcessResponse)
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }
}
