use std::{fmt, io};

use liaise::{Liaise, RegisterErrors};

use crate::Pid;

#[derive(RegisterErrors, Debug, Copy, Clone, PartialEq, Eq)]
#[error_prefix = "VOUCH"]
pub enum VouchCode {
    Io = 1,
    Bind = 2,
    PassCred = 3,
    MissingCredentials = 10,
    EmptyPayload = 11,
    MalformedControl = 12,
    Unauthorized = 13,
    Decode = 20,
    Encode = 21,
    UnreadablePayload = 22,
    InvalidRequest = 23,
    Send = 30,
    NoReply = 31,
    Restart = 32,
}

impl Liaise for VouchCode {
    fn code_id(self) -> u16 { self as u16 }

    fn message(self) -> &'static str {
        match self {
            Self::Io => "I/O error",
            Self::Bind => "Failed to bind socket",
            Self::PassCred => "Failed to enable credential passing",
            Self::MissingCredentials => "Message carries no control data",
            Self::EmptyPayload => "Message carries no payload",
            Self::MalformedControl => "Malformed control message",
            Self::Unauthorized => "Unauthorized sender",
            Self::Decode => "Envelope decode failed",
            Self::Encode => "Envelope encode failed",
            Self::UnreadablePayload => "Unreadable payload",
            Self::InvalidRequest => "Invalid request",
            Self::Send => "Failed to send reply",
            Self::NoReply => "No reply received",
            Self::Restart => "Failed to restart process",
        }
    }
}

/// Concrete runtime error type for the crate.
/// Uses `liaise` for stable IDs + formatting.
#[derive(Debug)]
pub struct VouchError {
    pub code: VouchCode,
    pub ctx: Option<String>,
    pub source: Option<VouchSource>,
}

#[derive(Debug)]
pub enum VouchSource {
    Io(io::Error),
    Nix(nix::Error),
    Postcard(postcard::Error),
    #[cfg(feature = "cbor")]
    Cbor(serde_cbor::Error),
}

impl VouchError {
    #[inline]
    pub fn new(code: VouchCode) -> Self {
        Self { code, ctx: None, source: None }
    }

    #[inline]
    pub fn ctx(mut self, ctx: impl fmt::Display) -> Self {
        self.ctx = Some(ctx.to_string());
        self
    }

    #[inline]
    fn with_source(code: VouchCode, source: VouchSource) -> Self {
        let ctx = match &source {
            VouchSource::Io(e) => e.to_string(),
            VouchSource::Nix(e) => e.to_string(),
            VouchSource::Postcard(e) => e.to_string(),
            #[cfg(feature = "cbor")]
            VouchSource::Cbor(e) => e.to_string(),
        };
        Self { code, ctx: Some(ctx), source: Some(source) }
    }

    #[inline]
    pub fn io(err: io::Error) -> Self {
        Self::with_source(VouchCode::Io, VouchSource::Io(err))
    }

    pub fn bind(path: &std::path::Path, err: io::Error) -> Self {
        let ctx = format!("{}: {err}", path.display());
        Self::with_source(VouchCode::Bind, VouchSource::Io(err)).ctx(ctx)
    }

    #[inline]
    pub fn pass_cred(err: nix::Error) -> Self {
        Self::with_source(VouchCode::PassCred, VouchSource::Nix(err))
    }

    #[inline]
    pub fn missing_credentials() -> Self {
        Self::new(VouchCode::MissingCredentials)
    }

    #[inline]
    pub fn empty_payload() -> Self {
        Self::new(VouchCode::EmptyPayload)
    }

    #[inline]
    pub fn malformed_control(ctx: impl fmt::Display) -> Self {
        Self::new(VouchCode::MalformedControl).ctx(ctx)
    }

    #[inline]
    pub fn unauthorized(pid: Pid) -> Self {
        Self::new(VouchCode::Unauthorized).ctx(format_args!("pid {pid}"))
    }

    #[inline]
    pub fn decode(err: postcard::Error) -> Self {
        Self::with_source(VouchCode::Decode, VouchSource::Postcard(err))
    }

    #[inline]
    pub fn encode(err: postcard::Error) -> Self {
        Self::with_source(VouchCode::Encode, VouchSource::Postcard(err))
    }

    #[cfg(feature = "cbor")]
    #[inline]
    pub fn cbor_decode(err: serde_cbor::Error) -> Self {
        Self::with_source(VouchCode::Decode, VouchSource::Cbor(err))
    }

    #[cfg(feature = "cbor")]
    #[inline]
    pub fn cbor_encode(err: serde_cbor::Error) -> Self {
        Self::with_source(VouchCode::Encode, VouchSource::Cbor(err))
    }

    #[inline]
    pub fn unreadable_payload(ctx: impl fmt::Display) -> Self {
        Self::new(VouchCode::UnreadablePayload).ctx(ctx)
    }

    #[inline]
    pub fn invalid_request(ctx: impl fmt::Display) -> Self {
        Self::new(VouchCode::InvalidRequest).ctx(ctx)
    }

    pub fn send(peer: &std::path::Path, err: io::Error) -> Self {
        let ctx = format!("{}: {err}", peer.display());
        Self::with_source(VouchCode::Send, VouchSource::Io(err)).ctx(ctx)
    }

    #[inline]
    pub fn no_reply(ctx: impl fmt::Display) -> Self {
        Self::new(VouchCode::NoReply).ctx(ctx)
    }

    #[inline]
    pub fn restart(ctx: impl fmt::Display) -> Self {
        Self::new(VouchCode::Restart).ctx(ctx)
    }

    /// Startup failures abort the process; everything else drops one message.
    pub fn is_fatal(&self) -> bool {
        matches!(self.code, VouchCode::Bind | VouchCode::PassCred)
    }
}

impl fmt::Display for VouchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // "[VOUCH0013] Unauthorized sender: pid 42"
        let base = self.code.render();
        match &self.ctx {
            Some(ctx) => write!(f, "{base}: {ctx}"),
            None => write!(f, "{base}"),
        }
    }
}

impl std::error::Error for VouchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(VouchSource::Io(e)) => Some(e),
            Some(VouchSource::Nix(e)) => Some(e),
            Some(VouchSource::Postcard(e)) => Some(e),
            #[cfg(feature = "cbor")]
            Some(VouchSource::Cbor(e)) => Some(e),
            None => None,
        }
    }
}

impl From<io::Error> for VouchError {
    #[inline]
    fn from(e: io::Error) -> Self {
        VouchError::io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_message_and_ctx() {
        let err = VouchError::unauthorized(3000);
        let rendered = err.to_string();
        assert!(rendered.contains("Unauthorized sender"));
        assert!(rendered.ends_with("pid 3000"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err: VouchError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code, VouchCode::Io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_only_startup_errors_are_fatal() {
        assert!(VouchError::pass_cred(nix::Error::EPERM).is_fatal());
        assert!(!VouchError::empty_payload().is_fatal());
        assert!(!VouchError::invalid_request("NONE").is_fatal());
    }
}
