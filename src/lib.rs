//! # VOUCH
//! Credential-mediated Unix datagram proxy.
//!
//! Sibling processes send small requests to a fixed socket path. The proxy
//! never looks at tokens or passwords: it trusts a datagram only when the
//! kernel-supplied sender pid is on its whitelist.
//!
//! ## Moving parts
//! * **Access store:** set of trusted pids with an atomic swap, so a
//!   supervised process that restarts can hand its trust to the new pid.
//! * **Credential verifier:** reads the `SCM_CREDENTIALS` record attached to
//!   each datagram.
//! * **Dispatcher:** answers heartbeats and applies pid swaps.
//! * **Responder:** sends every reply to one fixed peer path.
//! * **Monitor:** heartbeats the proxy and its workers from the supervising
//!   process, restarts whichever stops answering and swaps in the new pid.
//!
//! Rejected or malformed datagrams are logged and dropped. The protocol has no
//! negative reply.

pub mod access;
pub mod client;
pub mod codec;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod responder;
pub mod server;
pub mod traits;
pub mod types;

pub use access::AccessStore;
pub use client::ProxyClient;
#[cfg(feature = "cbor")]
pub use codec::CborCodec;
pub use codec::PostcardCodec;
pub use dispatch::Dispatcher;
pub use error::*;
pub use monitor::{Monitor, MonitorConfig, RestartHook, Target};
pub use protocol::*;
pub use responder::Responder;
pub use server::Proxy;
pub use traits::*;
pub use types::*;
