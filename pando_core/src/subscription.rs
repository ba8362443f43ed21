//! The "REACTIVATION" Engine - watcher-on-target subscriptions.
//!
//! A unit that cannot proceed because a dependency key is absent parks
//! itself instead of blocking a worker:
//! 1. Look the target up directly (check)
//! 2. On a miss, add its own wait tag and subscribe (park)
//! 3. When the target is created the store removes the wait tag (wake)
//!
//! Check-then-subscribe, never the reverse. The store closes the remaining
//! window by firing immediately when a subscription names a key that
//! already exists.

use crate::access::EntryAccess;
use pando_env::{Key, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One watcher waiting on one target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Entry to wake
    pub watcher: Key,

    /// Tag removed from the watcher on wake
    pub reactivation_tag: String,
}

/// Pending subscriptions keyed by the target they wait on.
///
/// Stores embed this table and drain it from inside their create path, so
/// registration and resolution are serialized with entry creation.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    pending: HashMap<Key, Vec<Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription. Returns false if an identical one is
    /// already pending on the same target.
    pub fn register(&mut self, watcher: Key, target: Key, reactivation_tag: &str) -> bool {
        let waiting = self.pending.entry(target).or_default();
        let sub = Subscription {
            watcher,
            reactivation_tag: reactivation_tag.to_string(),
        };
        if waiting.contains(&sub) {
            return false;
        }
        waiting.push(sub);
        true
    }

    /// Removes and returns every subscription waiting on `target`.
    pub fn take(&mut self, target: &Key) -> Vec<Subscription> {
        self.pending.remove(target).unwrap_or_default()
    }

    /// Removes every subscription of `watcher` under `reactivation_tag`,
    /// whatever its target. Returns how many were removed.
    pub fn forget(&mut self, watcher: &Key, reactivation_tag: &str) -> usize {
        let mut removed = 0;
        self.pending.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| !(s.watcher == *watcher && s.reactivation_tag == reactivation_tag));
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    /// Number of subscriptions waiting on `target`.
    pub fn pending_on(&self, target: &Key) -> usize {
        self.pending.get(target).map_or(0, Vec::len)
    }

    /// Targets `watcher` is still waiting on.
    pub fn targets_of(&self, watcher: &Key) -> Vec<Key> {
        let mut targets: Vec<Key> = self
            .pending
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.watcher == *watcher))
            .map(|(target, _)| *target)
            .collect();
        targets.sort();
        targets
    }

    /// Total number of pending subscriptions.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// How many candidates of a fan-out join must resolve before the join
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    /// First candidate wins
    AnyOf,

    /// Every candidate must exist (full fan-in)
    AllOf,
}

/// Result of polling a fan-out join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStatus {
    /// The policy is satisfied. Values are in candidate order; unresolved
    /// candidates are `None` (only possible under [`JoinPolicy::AnyOf`]).
    Ready(Vec<(Key, Option<Vec<u8>>)>),

    /// Still waiting; the watcher has parked itself on these keys.
    Pending(Vec<Key>),
}

/// A join of one watcher against several candidate keys.
#[derive(Debug, Clone)]
pub struct FanOutJoin {
    candidates: Vec<Key>,
    policy: JoinPolicy,
}

impl FanOutJoin {
    pub fn new(candidates: Vec<Key>, policy: JoinPolicy) -> Self {
        Self { candidates, policy }
    }

    pub fn any_of(candidates: Vec<Key>) -> Self {
        Self::new(candidates, JoinPolicy::AnyOf)
    }

    pub fn all_of(candidates: Vec<Key>) -> Self {
        Self::new(candidates, JoinPolicy::AllOf)
    }

    pub fn candidates(&self) -> &[Key] {
        &self.candidates
    }

    /// Checks every candidate and parks on the unresolved ones if the
    /// policy is not yet satisfied.
    ///
    /// Resolved candidates are never subscribed to, so re-polling after a
    /// partial wake only re-parks on keys that are still missing.
    pub fn poll(&self, access: &mut EntryAccess<'_>) -> Result<JoinStatus, StoreError> {
        let mut found = Vec::with_capacity(self.candidates.len());
        let mut missing = Vec::new();
        for key in &self.candidates {
            let value = access.get(key)?;
            if value.is_none() {
                missing.push(*key);
            }
            found.push((*key, value));
        }

        let satisfied = match self.policy {
            JoinPolicy::AnyOf => missing.len() < self.candidates.len(),
            JoinPolicy::AllOf => missing.is_empty(),
        };
        if satisfied {
            return Ok(JoinStatus::Ready(found));
        }

        access.park_on_all(&missing);
        Ok(JoinStatus::Pending(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pando_env::ChainInfo;

    fn key(n: i64) -> Key {
        Key::new(ChainInfo::pack(1, 0, 0), n, 0)
    }

    #[test]
    fn test_register_and_take() {
        let mut table = SubscriptionTable::new();
        assert!(table.register(key(1), key(9), "u:inactive"));
        assert!(table.register(key(2), key(9), "u:inactive"));
        assert_eq!(table.pending_on(&key(9)), 2);

        let woken = table.take(&key(9));
        assert_eq!(woken.len(), 2);
        assert_eq!(table.pending_on(&key(9)), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_forget_drops_only_matching_watcher() {
        let mut table = SubscriptionTable::new();
        for t in [10, 11, 12] {
            table.register(key(1), key(t), "join:inactive");
        }
        table.register(key(1), key(10), "other:inactive");
        table.register(key(2), key(11), "join:inactive");

        assert_eq!(table.forget(&key(1), "join:inactive"), 3);
        assert_eq!(table.targets_of(&key(1)), vec![key(10)]);
        assert_eq!(table.pending_on(&key(11)), 1);
        assert_eq!(table.pending_on(&key(12)), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_duplicate_registration_collapses() {
        let mut table = SubscriptionTable::new();
        assert!(table.register(key(1), key(9), "u:inactive"));
        assert!(!table.register(key(1), key(9), "u:inactive"));
        assert!(table.register(key(1), key(9), "other:inactive"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_targets_of_watcher() {
        let mut table = SubscriptionTable::new();
        for t in [10, 11, 12, 13] {
            table.register(key(1), key(t), "join:inactive");
        }
        table.register(key(2), key(10), "join:inactive");

        assert_eq!(table.targets_of(&key(1)), vec![key(10), key(11), key(12), key(13)]);
        table.take(&key(11));
        assert_eq!(table.targets_of(&key(1)), vec![key(10), key(12), key(13)]);
    }

    #[test]
    fn test_fan_out_poll_any_and_all() {
        use crate::memory_store::MemoryStore;
        use crate::unit::UnitConfig;
        use pando_env::{Entry, EntryStore, SystemContext, TagSet};

        let store = MemoryStore::new(SystemContext::shared());
        let unit = UnitConfig::new("join");
        let watcher = Entry::new(key(1), "w", TagSet::new());
        let candidates = vec![key(10), key(11), key(12), key(13)];

        let mut access = EntryAccess::new(&store, &unit, watcher.clone());
        let status = FanOutJoin::any_of(candidates.clone()).poll(&mut access).unwrap();
        assert_eq!(status, JoinStatus::Pending(candidates.clone()));
        assert_eq!(access.batch().subscriptions().len(), 4);

        store.create(TagSet::new(), b"c".to_vec(), key(12)).unwrap();

        let mut access = EntryAccess::new(&store, &unit, watcher.clone());
        match FanOutJoin::any_of(candidates.clone()).poll(&mut access).unwrap() {
            JoinStatus::Ready(found) => {
                assert_eq!(found[2], (key(12), Some(b"c".to_vec())));
                assert_eq!(found[0], (key(10), None));
            }
            other => panic!("expected ready, got {:?}", other),
        }
        assert!(access.batch().is_empty());

        // Full fan-in re-parks only on the still missing candidates
        let mut access = EntryAccess::new(&store, &unit, watcher);
        let status = FanOutJoin::all_of(candidates).poll(&mut access).unwrap();
        assert_eq!(status, JoinStatus::Pending(vec![key(10), key(11), key(13)]));
        assert!(access.batch().subscriptions().iter().all(|s| s.target != key(12)));
    }
}
