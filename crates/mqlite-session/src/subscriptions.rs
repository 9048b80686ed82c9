//! Subscription tracking for session restoration.
//!
//! The registry is the list of topics the application asked for. Membership
//! survives reconnects; per-attempt acknowledgement state does not. When the
//! broker reports no stored session, every entry is replayed in one SUBSCRIBE.

use crate::packet::{reason_name, MAX_QOS};
use crate::packet_id::MessageIdAllocator;

/// One requested topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Topic filter
    pub topic: String,
    /// Id of the SUBSCRIBE that last requested this topic
    pub message_id: u16,
    /// Whether the broker granted it for that SUBSCRIBE
    pub acknowledged: bool,
    /// Position of this topic inside that SUBSCRIBE
    pub order_index: usize,
}

/// Registry of requested subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `topics` for a new SUBSCRIBE and return its message id.
    ///
    /// Topics already present are refreshed in place rather than duplicated.
    pub fn add(&mut self, topics: &[String], ids: &mut MessageIdAllocator) -> u16 {
        let message_id = ids.next();
        for (order_index, topic) in topics.iter().enumerate() {
            match self.entries.iter_mut().find(|s| &s.topic == topic) {
                Some(existing) => {
                    existing.message_id = message_id;
                    existing.acknowledged = false;
                    existing.order_index = order_index;
                }
                None => self.entries.push(Subscription {
                    topic: topic.clone(),
                    message_id,
                    acknowledged: false,
                    order_index,
                }),
            }
        }
        message_id
    }

    /// Drop every entry for `topics`, acknowledged or not.
    pub fn remove(&mut self, topics: &[String]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|s| !topics.contains(&s.topic));
        before - self.entries.len()
    }

    /// Apply SUBACK grants to the entries of `message_id`.
    ///
    /// Grants are matched positionally through `order_index`. A grant above
    /// [`MAX_QOS`] leaves the entry unacknowledged. Returns true only if every
    /// grant was acceptable. A SUBACK without grants acknowledges nothing.
    pub fn mark_acknowledged(&mut self, message_id: u16, grants: &[u8]) -> bool {
        let accepted = !grants.is_empty() && grants.iter().all(|&code| code <= MAX_QOS);

        for entry in self.entries.iter_mut().filter(|s| s.message_id == message_id) {
            let Some(&code) = grants.get(entry.order_index).or_else(|| grants.first()) else {
                continue;
            };
            if code <= MAX_QOS {
                entry.acknowledged = true;
            } else {
                entry.acknowledged = false;
                log::warn!("Subscribe failed: {} {}", entry.topic, reason_name(code));
            }
        }

        accepted
    }

    /// Reassign every entry to one fresh SUBSCRIBE.
    ///
    /// Returns the new message id and the topics in order, or `None` when there
    /// is nothing to replay.
    pub fn replay_all(&mut self, ids: &mut MessageIdAllocator) -> Option<(u16, Vec<String>)> {
        if self.entries.is_empty() {
            return None;
        }

        let message_id = ids.next();
        let topics = self
            .entries
            .iter_mut()
            .enumerate()
            .map(|(order_index, entry)| {
                entry.message_id = message_id;
                entry.acknowledged = false;
                entry.order_index = order_index;
                entry.topic.clone()
            })
            .collect();

        Some((message_id, topics))
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.iter().any(|s| s.topic == topic)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, topic: &str) -> Option<&Subscription> {
        self.entries.iter().find(|s| s.topic == topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
