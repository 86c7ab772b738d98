use crate::net::envelope::{Envelope, Opcode};
use crate::net::error::ClientError;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// One-shot waiters for replies, keyed by (peer, opcode).
///
/// A waiter is registered before its request goes out so a fast reply can
/// never arrive unclaimed.
#[derive(Debug, Default)]
pub(crate) struct PendingResponses {
    waiters: Mutex<HashMap<(String, Opcode), oneshot::Sender<Envelope>>>,
}

impl PendingResponses {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        peer: &str,
        opcode: Opcode,
    ) -> Result<oneshot::Receiver<Envelope>, ClientError> {
        let mut waiters = self.waiters.lock();
        let key = (peer.to_string(), opcode);

        // A waiter whose caller went away does not block a new request
        if waiters.get(&key).is_some_and(|tx| !tx.is_closed()) {
            return Err(ClientError::RequestOutstanding {
                peer: peer.to_string(),
                opcode,
            });
        }

        let (tx, rx) = oneshot::channel();
        waiters.insert(key, tx);
        Ok(rx)
    }

    /// Hands a reply to its waiter. Returns the envelope back if nobody waits
    /// for it.
    pub(crate) fn resolve(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(opcode) = envelope.method.opcode() else {
            return Err(envelope);
        };

        let waiter = self
            .waiters
            .lock()
            .remove(&(envelope.sender.clone(), opcode));

        match waiter {
            Some(tx) => tx.send(envelope),
            None => Err(envelope),
        }
    }

    pub(crate) fn cancel(&self, peer: &str, opcode: Opcode) {
        self.waiters.lock().remove(&(peer.to_string(), opcode));
    }

    /// Wakes every waiter with a closed channel.
    pub(crate) fn close_all(&self) {
        self.waiters.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}
