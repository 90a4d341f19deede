//! Bounded set of recently seen message identities.

use std::collections::{HashSet, VecDeque};

use tasklist_proto::MessageIdentity;

/// Remembers message identities for the lifetime of one connection.
///
/// Once `capacity` identities are held the oldest is forgotten first, so a
/// long-lived connection cannot grow the set without limit. Identities are
/// a heuristic (see [`MessageIdentity`]); forgetting one only means a very
/// late redelivery of that message is applied again.
#[derive(Debug, Clone)]
pub struct SeenMessages {
    order: VecDeque<MessageIdentity>,
    set: HashSet<MessageIdentity>,
    capacity: usize,
}

impl SeenMessages {
    /// Creates an empty set holding at most `capacity` identities (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::new(),
            set: HashSet::new(),
            capacity,
        }
    }

    /// Records `identity`. Returns `false` if it was already present.
    pub fn insert(&mut self, identity: MessageIdentity) -> bool {
        if self.set.contains(&identity) {
            return false;
        }
        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.set.remove(&oldest);
        }
        self.set.insert(identity.clone());
        self.order.push_back(identity);
        true
    }

    /// Whether `identity` has been recorded and not yet evicted.
    #[must_use]
    pub fn contains(&self, identity: &MessageIdentity) -> bool {
        self.set.contains(identity)
    }

    /// Number of identities currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no identity is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }
}
