//! In-memory reference implementation of [`EntryStore`].

use crate::subscription::SubscriptionTable;
use pando_env::{Entry, EntryStore, Key, PandoContext, StoreError, TagSet};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

#[derive(Default)]
struct Inner {
    entries: BTreeMap<Key, Entry>,
    by_tag: HashMap<String, BTreeSet<Key>>,
    subscriptions: SubscriptionTable,
}

impl Inner {
    fn index(&mut self, key: Key, tags: &TagSet) {
        for tag in tags.iter() {
            self.by_tag.entry(tag.to_string()).or_default().insert(key);
        }
    }

    fn unindex(&mut self, key: &Key, tag: &str) {
        if let Some(keys) = self.by_tag.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_tag.remove(tag);
            }
        }
    }

    fn remove_tag(&mut self, key: &Key, tag: &str) -> bool {
        let removed = match self.entries.get_mut(key) {
            Some(entry) => entry.tags.remove(tag),
            None => return false,
        };
        if removed {
            self.unindex(key, tag);
        }
        removed
    }

    /// Delivers every wake signal pending on `target`.
    fn wake(&mut self, target: &Key) {
        for sub in self.subscriptions.take(target) {
            if self.remove_tag(&sub.watcher, &sub.reactivation_tag) {
                debug!("Woke {} on {} ({})", sub.watcher, target, sub.reactivation_tag);
            } else {
                trace!("Wake for {} on {} had nothing to clear", sub.watcher, target);
            }
        }
    }
}

/// Ordered in-memory entry store.
///
/// A single lock guards entries, the tag index and the subscription table,
/// so every operation is atomic to concurrent readers and a subscription can
/// never miss the create of its target.
pub struct MemoryStore {
    ctx: Arc<dyn PandoContext>,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(ctx: Arc<dyn PandoContext>) -> Self {
        Self {
            ctx,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Subscriptions not yet fired.
    pub fn pending_subscriptions(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.subscriptions.len())
    }

    /// Targets `watcher` is still subscribed to.
    pub fn waiting_on(&self, watcher: &Key) -> Result<Vec<Key>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.subscriptions.targets_of(watcher))
    }
}

impl EntryStore for MemoryStore {
    fn create(&self, tags: TagSet, value: Vec<u8>, key: Key) -> Result<Key, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let key = if key.is_sentinel() {
            loop {
                let candidate = self.ctx.random_key();
                if !candidate.is_sentinel() && !inner.entries.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            key
        };

        let incoming = Entry::new(key, value, tags);
        let stored = match inner.entries.get(&key) {
            Some(existing) if !existing.should_merge_with(&incoming) => {
                trace!("Identical create of {} ignored", key);
                return Ok(key);
            }
            Some(existing) => {
                debug!("Merging colliding create into {}", key);
                existing.merged_with(&incoming)
            }
            None => incoming,
        };

        inner.index(key, &stored.tags);
        inner.entries.insert(key, stored);
        inner.wake(&key);
        Ok(key)
    }

    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.entries.get(key).map(|e| e.value.clone()))
    }

    fn entry(&self, key: &Key) -> Result<Option<Entry>, StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.entries.get(key).cloned())
    }

    fn update(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let entry = inner.entries.get_mut(key).ok_or(StoreError::NotFound(*key))?;
        entry.value = value;
        Ok(())
    }

    fn add_tag(&self, key: &Key, tag: &str) -> Result<(), StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let entry = inner.entries.get_mut(key).ok_or(StoreError::NotFound(*key))?;
        if entry.tags.insert(tag) {
            inner.by_tag.entry(tag.to_string()).or_default().insert(*key);
        }
        Ok(())
    }

    fn remove_tag(&self, key: &Key, tag: &str) -> Result<(), StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        if !inner.entries.contains_key(key) {
            return Err(StoreError::NotFound(*key));
        }
        inner.remove_tag(key, tag);
        Ok(())
    }

    fn subscribe(&self, watcher: Key, target: Key, reactivation_tag: &str) -> Result<(), StoreError> {
        if watcher.is_sentinel() || target.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        if inner.entries.contains_key(&target) {
            // Target won the race against the subscription
            inner.remove_tag(&watcher, reactivation_tag);
            debug!("Subscription of {} on existing {} fired immediately", watcher, target);
            return Ok(());
        }
        inner.subscriptions.register(watcher, target, reactivation_tag);
        Ok(())
    }

    fn unsubscribe(&self, watcher: &Key, reactivation_tag: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let dropped = inner.subscriptions.forget(watcher, reactivation_tag);
        if dropped > 0 {
            trace!("Dropped {} subscriptions of {} ({})", dropped, watcher, reactivation_tag);
        }
        Ok(dropped)
    }

    fn query_by_tags(&self, tags: &[&str]) -> Result<Vec<Key>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let Some((first, rest)) = tags.split_first() else {
            return Ok(Vec::new());
        };
        let Some(seed) = inner.by_tag.get(*first) else {
            return Ok(Vec::new());
        };
        Ok(seed
            .iter()
            .filter(|key| {
                rest.iter()
                    .all(|tag| inner.by_tag.get(*tag).is_some_and(|keys| keys.contains(*key)))
            })
            .copied()
            .collect())
    }

    fn keys(&self) -> Result<Vec<Key>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.entries.keys().copied().collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.entries.len())
    }

    fn entries(&self) -> Result<Vec<Entry>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.entries.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pando_env::{ChainInfo, SystemContext, FORCE_MERGE_TAG, MERGED_TAG};

    fn store() -> MemoryStore {
        MemoryStore::new(SystemContext::shared())
    }

    fn key(b: i64, c: i64) -> Key {
        Key::new(ChainInfo::pack(7, 1, 0), b, c)
    }

    fn tags(list: &[&str]) -> TagSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_create_and_get() {
        let s = store();
        s.create(tags(&["A"]), b"hello".to_vec(), key(1, 2)).unwrap();
        assert_eq!(s.get(&key(1, 2)).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(s.get(&key(1, 3)).unwrap(), None);
    }

    #[test]
    fn test_sentinel_resolves_to_fresh_keys() {
        let s = store();
        let k1 = s.create(tags(&["R"]), b"x".to_vec(), Key::SENTINEL).unwrap();
        let k2 = s.create(tags(&["R"]), b"x".to_vec(), Key::SENTINEL).unwrap();

        assert!(k1.is_random() && k2.is_random());
        assert!(!k1.is_sentinel());
        assert_ne!(k1, k2);
        assert_eq!(s.len().unwrap(), 2);
        assert!(matches!(s.get(&Key::SENTINEL), Err(StoreError::SentinelKey)));
    }

    #[test]
    fn test_identical_create_is_noop() {
        let s = store();
        s.create(tags(&["A"]), b"v".to_vec(), key(1, 1)).unwrap();
        s.create(tags(&["A"]), b"v".to_vec(), key(1, 1)).unwrap();

        let e = s.entry(&key(1, 1)).unwrap().unwrap();
        assert_eq!(e.value, b"v".to_vec());
        assert!(!e.has_tag(MERGED_TAG));
    }

    #[test]
    fn test_colliding_create_merges() {
        let s = store();
        s.create(tags(&["A"]), b"one".to_vec(), key(1, 1)).unwrap();
        s.create(tags(&["B"]), b"two".to_vec(), key(1, 1)).unwrap();

        let e = s.entry(&key(1, 1)).unwrap().unwrap();
        assert_eq!(e.value, b"one\ntwo".to_vec());
        assert!(e.has_tag("A") && e.has_tag("B") && e.has_tag(MERGED_TAG));
        assert_eq!(s.query_by_tags(&["B"]).unwrap(), vec![key(1, 1)]);
    }

    #[test]
    fn test_force_merge_of_identical_entries() {
        let s = store();
        s.create(tags(&[FORCE_MERGE_TAG]), b"v".to_vec(), key(1, 1)).unwrap();
        s.create(tags(&[FORCE_MERGE_TAG]), b"v".to_vec(), key(1, 1)).unwrap();

        assert_eq!(s.get(&key(1, 1)).unwrap(), Some(b"v\nv".to_vec()));
    }

    #[test]
    fn test_update_and_tags_require_existing_key() {
        let s = store();
        assert!(matches!(s.update(&key(9, 9), vec![]), Err(StoreError::NotFound(_))));
        assert!(matches!(s.add_tag(&key(9, 9), "x"), Err(StoreError::NotFound(_))));

        s.create(tags(&[]), b"a".to_vec(), key(9, 9)).unwrap();
        s.update(&key(9, 9), b"b".to_vec()).unwrap();
        s.add_tag(&key(9, 9), "x").unwrap();
        s.add_tag(&key(9, 9), "x").unwrap();
        s.remove_tag(&key(9, 9), "missing").unwrap();

        let e = s.entry(&key(9, 9)).unwrap().unwrap();
        assert_eq!(e.value, b"b".to_vec());
        assert_eq!(e.tags.len(), 1);
    }

    #[test]
    fn test_query_by_tags_intersects() {
        let s = store();
        s.create(tags(&["BTC", "TX"]), vec![], key(1, 0)).unwrap();
        s.create(tags(&["BTC"]), vec![], key(2, 0)).unwrap();
        s.create(tags(&["TX"]), vec![], key(3, 0)).unwrap();

        assert_eq!(s.query_by_tags(&["BTC", "TX"]).unwrap(), vec![key(1, 0)]);
        assert_eq!(s.query_by_tags(&["BTC"]).unwrap(), vec![key(1, 0), key(2, 0)]);
        assert!(s.query_by_tags(&[]).unwrap().is_empty());
        assert!(s.query_by_tags(&["ETH"]).unwrap().is_empty());

        s.remove_tag(&key(1, 0), "TX").unwrap();
        assert!(s.query_by_tags(&["BTC", "TX"]).unwrap().is_empty());
    }

    #[test]
    fn test_subscription_wakes_on_create() {
        let s = store();
        s.create(tags(&["u:inactive"]), b"w".to_vec(), key(1, 0)).unwrap();
        s.subscribe(key(1, 0), key(2, 0), "u:inactive").unwrap();
        assert!(s.entry(&key(1, 0)).unwrap().unwrap().has_tag("u:inactive"));
        assert_eq!(s.pending_subscriptions().unwrap(), 1);

        s.create(tags(&[]), b"t".to_vec(), key(2, 0)).unwrap();
        assert!(!s.entry(&key(1, 0)).unwrap().unwrap().has_tag("u:inactive"));
        assert_eq!(s.pending_subscriptions().unwrap(), 0);
    }

    #[test]
    fn test_subscription_on_existing_target_fires_immediately() {
        let s = store();
        s.create(tags(&[]), b"t".to_vec(), key(2, 0)).unwrap();
        s.create(tags(&["u:inactive"]), b"w".to_vec(), key(1, 0)).unwrap();
        s.subscribe(key(1, 0), key(2, 0), "u:inactive").unwrap();

        assert!(!s.entry(&key(1, 0)).unwrap().unwrap().has_tag("u:inactive"));
        assert_eq!(s.pending_subscriptions().unwrap(), 0);
    }

    #[test]
    fn test_fan_out_wakes_on_first_candidate() {
        let s = store();
        s.create(tags(&["j:inactive"]), b"w".to_vec(), key(1, 0)).unwrap();
        for c in 10..14 {
            s.subscribe(key(1, 0), key(c, 0), "j:inactive").unwrap();
        }
        assert_eq!(s.waiting_on(&key(1, 0)).unwrap().len(), 4);

        s.create(tags(&[]), b"c".to_vec(), key(12, 0)).unwrap();
        assert!(!s.entry(&key(1, 0)).unwrap().unwrap().has_tag("j:inactive"));
        assert_eq!(s.waiting_on(&key(1, 0)).unwrap().len(), 3);
    }
}
