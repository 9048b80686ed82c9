//! Correlation of outbound requests with their acknowledgements.
//!
//! Every QoS 1 PUBLISH, SUBSCRIBE and UNSUBSCRIBE registers one waiter keyed by
//! `(AckKind, message id)`. The matching PUBACK/SUBACK/UNSUBACK resolves it;
//! closing the connection resolves everything left as [`Resolution::Closed`].
//! A key is removed as soon as it is resolved, so each waiter completes once.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::packet::{PubAck, SubAck, UnsubAck};

/// Acknowledgement packet kind a request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    PubAck,
    SubAck,
    UnsubAck,
}

/// Key of an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub kind: AckKind,
    pub message_id: u16,
}

impl RequestKey {
    pub fn puback(message_id: u16) -> Self {
        Self {
            kind: AckKind::PubAck,
            message_id,
        }
    }

    pub fn suback(message_id: u16) -> Self {
        Self {
            kind: AckKind::SubAck,
            message_id,
        }
    }

    pub fn unsuback(message_id: u16) -> Self {
        Self {
            kind: AckKind::UnsubAck,
            message_id,
        }
    }
}

/// Acknowledgement delivered to a waiter.
#[derive(Debug, Clone)]
pub enum Ack {
    PubAck(PubAck),
    SubAck {
        packet: SubAck,
        /// Every grant was within the requested QoS.
        granted: bool,
    },
    UnsubAck(UnsubAck),
}

/// Final outcome of a pending request.
#[derive(Debug, Clone)]
pub enum Resolution {
    Acked(Ack),
    Closed,
}

/// Receiving side of a registered request.
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<Resolution>,
}

impl Waiter {
    /// Wait for the acknowledgement or the connection to close.
    ///
    /// A slot dropped without a value (session torn down) also counts as closed.
    pub async fn outcome(self) -> Resolution {
        self.rx.await.unwrap_or(Resolution::Closed)
    }
}

/// Table of outstanding requests.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: HashMap<RequestKey, oneshot::Sender<Resolution>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `key`.
    ///
    /// If the id space wrapped onto a request that is still outstanding, the
    /// older waiter is resolved as closed so a key never has two waiters.
    pub fn register(&mut self, key: RequestKey) -> Waiter {
        let (tx, rx) = oneshot::channel();
        if let Some(stale) = self.waiters.insert(key, tx) {
            log::warn!(
                "Message id {} reused while still pending ({:?}), dropping older request",
                key.message_id,
                key.kind
            );
            let _ = stale.send(Resolution::Closed);
        }
        Waiter { rx }
    }

    /// Resolve the waiter for `key`. Returns false for late or duplicate acks.
    pub fn resolve(&mut self, key: RequestKey, ack: Ack) -> bool {
        match self.waiters.remove(&key) {
            Some(tx) => {
                // Receiver may have been dropped by a caller that gave up.
                let _ = tx.send(Resolution::Acked(ack));
                true
            }
            None => false,
        }
    }

    /// Resolve every outstanding request as closed. Returns how many there were.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.waiters.len();
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Resolution::Closed);
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &RequestKey) -> bool {
        self.waiters.contains_key(key)
    }
}
