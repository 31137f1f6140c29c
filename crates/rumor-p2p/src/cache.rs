//! Bounded message caches owned by the strategy loop.
//!
//! - [`PendingCache`]: messages waiting to be relayed, oldest evicted first
//! - [`SeenCache`]: recently seen message ids, for deduplication
//! - [`NotificationTable`]: received messages awaiting local validation

use crate::message::{GossipPush, MessageId};
use rumor_admission::ConnectionId;
use std::collections::{HashMap, HashSet, VecDeque};

/// A message waiting to be relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Network-wide identity.
    pub message_id: MessageId,
    /// Hops left; relays carry `budget - 1`.
    pub budget: u8,
    /// Gossip type.
    pub data_type: u16,
    /// Application payload.
    pub payload: Vec<u8>,
    /// Peer the message arrived from, never sent back to.
    pub origin: Option<ConnectionId>,
    /// Peers already sent to.
    pub sent_to: HashSet<ConnectionId>,
    /// Rounds the message has been offered in.
    pub rounds: u32,
}

impl PendingMessage {
    /// Creates a message announced by a local module.
    #[must_use]
    pub fn local(budget: u8, data_type: u16, payload: Vec<u8>) -> Self {
        Self {
            message_id: MessageId::new(),
            budget,
            data_type,
            payload,
            origin: None,
            sent_to: HashSet::new(),
            rounds: 0,
        }
    }

    /// Creates a message received from `origin`.
    #[must_use]
    pub fn relayed(push: GossipPush, origin: ConnectionId) -> Self {
        Self {
            message_id: push.message_id,
            budget: push.ttl,
            data_type: push.data_type,
            payload: push.payload,
            origin: Some(origin),
            sent_to: HashSet::new(),
            rounds: 0,
        }
    }

    /// Returns true if `peer` should receive this message.
    #[must_use]
    pub fn should_send_to(&self, peer: &ConnectionId) -> bool {
        self.origin.as_ref() != Some(peer) && !self.sent_to.contains(peer)
    }

    /// Builds the push a peer receives, with one hop spent.
    #[must_use]
    pub fn to_push(&self) -> GossipPush {
        GossipPush {
            message_id: self.message_id,
            ttl: self.budget.saturating_sub(1),
            data_type: self.data_type,
            payload: self.payload.clone(),
        }
    }
}

/// FIFO of messages waiting to be relayed.
#[derive(Debug)]
pub struct PendingCache {
    entries: VecDeque<PendingMessage>,
    capacity: usize,
}

impl PendingCache {
    /// Creates a cache holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queues a message, returning the entry evicted to make room.
    ///
    /// Messages with no hop budget and duplicates are ignored.
    pub fn insert(&mut self, message: PendingMessage) -> Option<PendingMessage> {
        if message.budget == 0 || self.capacity == 0 || self.contains(&message.message_id) {
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(message);
        evicted
    }

    /// Removes a message.
    pub fn remove(&mut self, message_id: &MessageId) -> Option<PendingMessage> {
        let pos = self
            .entries
            .iter()
            .position(|m| &m.message_id == message_id)?;
        self.entries.remove(pos)
    }

    /// Returns true if the message is queued.
    #[must_use]
    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.entries.iter().any(|m| &m.message_id == message_id)
    }

    /// Iterates messages oldest first.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingMessage> {
        self.entries.iter_mut()
    }

    /// Drops messages for which `keep` returns false.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&PendingMessage) -> bool,
    {
        self.entries.retain(keep);
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bounded set of recently seen message ids.
#[derive(Debug)]
pub struct SeenCache {
    seen: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl SeenCache {
    /// Creates a cache remembering at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records an id. Returns false if it was already known.
    pub fn insert(&mut self, message_id: MessageId) -> bool {
        if self.seen.contains(&message_id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(message_id);
        self.order.push_back(message_id);
        true
    }

    /// Returns true if the id is remembered.
    #[must_use]
    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.seen.contains(message_id)
    }

    /// Number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no id is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Received messages awaiting validation, keyed by a local `u16` id.
#[derive(Debug)]
pub struct NotificationTable {
    entries: HashMap<u16, PendingMessage>,
    order: VecDeque<u16>,
    next_id: u16,
    capacity: usize,
}

impl NotificationTable {
    /// Creates a table holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_id: 0,
            capacity: capacity.clamp(1, usize::from(u16::MAX)),
        }
    }

    /// Stores a message and returns the id handed to local modules.
    pub fn insert(&mut self, message: PendingMessage) -> u16 {
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        let mut id = self.next_id;
        while self.entries.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);
        self.entries.insert(id, message);
        self.order.push_back(id);
        id
    }

    /// Removes and returns the message behind `id`.
    pub fn take(&mut self, id: u16) -> Option<PendingMessage> {
        let message = self.entries.remove(&id)?;
        if let Some(pos) = self.order.iter().position(|o| *o == id) {
            self.order.remove(pos);
        }
        Some(message)
    }

    /// Number of messages awaiting validation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing awaits validation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn local(budget: u8) -> PendingMessage {
        PendingMessage::local(budget, 7, b"data".to_vec())
    }

    // ========== PendingMessage Tests ==========

    #[test]
    fn push_spends_one_hop() {
        let message = local(3);
        assert_eq!(message.to_push().ttl, 2);
        assert_eq!(local(1).to_push().ttl, 0);
    }

    #[test]
    fn relayed_message_never_returns_to_origin() {
        let push = GossipPush {
            message_id: MessageId::new(),
            ttl: 2,
            data_type: 1,
            payload: vec![],
        };
        let mut message = PendingMessage::relayed(push, ConnectionId::from("origin"));
        assert!(!message.should_send_to(&ConnectionId::from("origin")));
        assert!(message.should_send_to(&ConnectionId::from("other")));

        message.sent_to.insert(ConnectionId::from("other"));
        assert!(!message.should_send_to(&ConnectionId::from("other")));
    }

    // ========== PendingCache Tests ==========

    #[test]
    fn pending_evicts_oldest_first() {
        let mut cache = PendingCache::new(2);
        let first = local(1);
        let first_id = first.message_id;
        assert!(cache.insert(first).is_none());
        assert!(cache.insert(local(1)).is_none());

        let evicted = cache.insert(local(1)).expect("cache full");
        assert_eq!(evicted.message_id, first_id);
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&first_id));
    }

    #[test]
    fn pending_ignores_zero_budget_and_duplicates() {
        let mut cache = PendingCache::new(4);
        cache.insert(local(0));
        assert!(cache.is_empty());

        let message = local(2);
        cache.insert(message.clone());
        cache.insert(message);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn pending_remove_and_retain() {
        let mut cache = PendingCache::new(4);
        let keep = local(2);
        let drop_me = local(2);
        let (keep_id, drop_id) = (keep.message_id, drop_me.message_id);
        cache.insert(keep);
        cache.insert(drop_me);

        assert!(cache.remove(&drop_id).is_some());
        assert!(cache.remove(&drop_id).is_none());

        cache.retain(|m| m.message_id != keep_id);
        assert!(cache.is_empty());
    }

    // ========== SeenCache Tests ==========

    #[test]
    fn seen_rejects_duplicates() {
        let mut seen = SeenCache::new(4);
        let id = MessageId::new();
        assert!(seen.insert(id));
        assert!(!seen.insert(id));
        assert!(seen.contains(&id));
    }

    #[test]
    fn seen_forgets_oldest() {
        let mut seen = SeenCache::new(2);
        let ids: Vec<MessageId> = (0..3).map(|_| MessageId::new()).collect();
        for id in &ids {
            seen.insert(*id);
        }
        assert!(!seen.contains(&ids[0]));
        assert!(seen.contains(&ids[2]));
        assert_eq!(seen.len(), 2);
    }

    // ========== NotificationTable Tests ==========

    #[test]
    fn notification_ids_are_distinct_and_taken_once() {
        let mut table = NotificationTable::new(8);
        let a = table.insert(local(1));
        let b = table.insert(local(1));
        assert_ne!(a, b);

        assert!(table.take(a).is_some());
        assert!(table.take(a).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn notification_table_is_bounded() {
        let mut table = NotificationTable::new(2);
        let first = table.insert(local(1));
        table.insert(local(1));
        table.insert(local(1));
        assert_eq!(table.len(), 2);
        assert!(table.take(first).is_none());
    }

    #[test]
    fn notification_ids_wrap_around() {
        let mut table = NotificationTable::new(4);
        table.next_id = u16::MAX;
        let a = table.insert(local(1));
        let b = table.insert(local(1));
        assert_eq!(a, u16::MAX);
        assert_eq!(b, 0);
    }

    proptest! {
        #[test]
        fn caches_never_exceed_capacity(capacity in 1usize..16, inserts in 0usize..64) {
            let mut pending = PendingCache::new(capacity);
            let mut seen = SeenCache::new(capacity);
            let mut table = NotificationTable::new(capacity);
            for _ in 0..inserts {
                pending.insert(local(1));
                seen.insert(MessageId::new());
                table.insert(local(1));
            }
            prop_assert!(pending.len() <= capacity);
            prop_assert!(seen.len() <= capacity);
            prop_assert!(table.len() <= capacity);
            prop_assert_eq!(pending.len(), inserts.min(capacity));
        }
    }
}
