//! Sender verification from `SCM_CREDENTIALS` ancillary data.
//!
//! The kernel fills the credential record itself once the receiving socket
//! has `SO_PASSCRED` set, so the sender cannot forge it. Only the first
//! control message of a datagram is consulted.

use nix::sys::socket::ControlMessageOwned;

use crate::{AccessStore, PeerCredential, Pid, VouchError};

/// Outcome of checking a datagram's sender against the whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Authorized(PeerCredential),
    Unauthorized(PeerCredential),
}

impl Verdict {
    pub fn credential(&self) -> PeerCredential {
        match *self {
            Self::Authorized(c) | Self::Unauthorized(c) => c,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }
}

/// Reads the sender out of an `SCM_CREDENTIALS` record.
pub fn parse_credentials(msg: &ControlMessageOwned) -> Result<PeerCredential, VouchError> {
    let ControlMessageOwned::ScmCredentials(cred) = msg else {
        return Err(VouchError::malformed_control(format_args!(
            "expected SCM_CREDENTIALS, got {msg:?}"
        )));
    };

    let raw_pid = cred.pid();
    let pid = Pid::try_from(raw_pid)
        .map_err(|_| VouchError::malformed_control(format_args!("negative pid {raw_pid}")))?;

    Ok(PeerCredential { pid, uid: cred.uid(), gid: cred.gid() })
}

/// Extracts the sender from the first control record and checks it
/// against `store`.
pub fn verify(control: &[ControlMessageOwned], store: &AccessStore) -> Result<Verdict, VouchError> {
    let first = control
        .first()
        .ok_or_else(|| VouchError::malformed_control("no control messages"))?;
    let credential = parse_credentials(first)?;

    Ok(if store.is_authorized(credential.pid) {
        Verdict::Authorized(credential)
    } else {
        Verdict::Unauthorized(credential)
    })
}
