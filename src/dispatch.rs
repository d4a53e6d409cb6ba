use std::sync::Arc;

use tracing::info;

use crate::{AccessStore, AuthorizeProcess, Envelope, Payload, VouchError};

/// Routes verified requests to their handler and builds the reply.
///
/// Holds no lock of its own; the only shared state is the injected store.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<AccessStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<AccessStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AccessStore {
        &self.store
    }

    /// Returns the reply for `request`. Only the two request kinds are
    /// accepted; anything else yields an invalid request error and no reply.
    pub fn dispatch(&self, request: Envelope) -> Result<Envelope, VouchError> {
        match request.payload {
            Payload::HeartbeatRequest => Ok(self.handle_heartbeat(request.seq_num)),
            Payload::AuthorizeProcessRequest(req) => {
                Ok(self.handle_authorize_process(req, request.seq_num))
            }
            other => Err(VouchError::invalid_request(format_args!(
                "{} is not a request",
                other.payload_type()
            ))),
        }
    }

    fn handle_heartbeat(&self, seq: u64) -> Envelope {
        info!(seq, "handling heartbeat request");
        Envelope::heartbeat_response(seq)
    }

    fn handle_authorize_process(&self, req: AuthorizeProcess, seq: u64) -> Envelope {
        self.store.authorize(req.new_pid, req.old_pid);
        info!(seq, old_pid = req.old_pid, new_pid = req.new_pid, "handling authorization swap");
        Envelope::authorize_process_response(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VouchCode;

    fn dispatcher_with(pid: u32) -> Dispatcher {
        Dispatcher::new(Arc::new(AccessStore::bootstrapped(pid)))
    }

    #[test]
    fn test_heartbeat_echoes_sequence() {
        let d = dispatcher_with(1000);
        let reply = d.dispatch(Envelope::heartbeat_request(8)).unwrap();
        assert_eq!(reply, Envelope::heartbeat_response(8));
    }

    #[test]
    fn test_authorize_swaps_and_echoes() {
        let d = dispatcher_with(100);
        let reply = d.dispatch(Envelope::authorize_process_request(31, 200, 100)).unwrap();

        assert_eq!(reply, Envelope::authorize_process_response(31));
        assert!(d.store().is_authorized(200));
        assert!(!d.store().is_authorized(100));
    }

    #[test]
    fn test_responses_are_not_requests() {
        let d = dispatcher_with(1000);
        for env in [Envelope::heartbeat_response(1), Envelope::authorize_process_response(2)] {
            let err = d.dispatch(env).unwrap_err();
            assert_eq!(err.code, VouchCode::InvalidRequest);
        }
        assert_eq!(d.store().authorized_pids(), vec![1000]);
    }
}
