//! The store surface handed to a single-entry unit while it executes.
//!
//! Reads go straight to the store. Writes are staged into a
//! [`CommitBatch`] that the dispatcher applies after the unit returns, or
//! discards if the unit raised an invariant violation.

use crate::commit::CommitBatch;
use crate::unit::UnitConfig;
use pando_env::{Entry, EntryStore, Key, StoreError, TagSet};

pub struct EntryAccess<'a> {
    store: &'a dyn EntryStore,
    unit: &'a UnitConfig,
    entry: Entry,
    batch: CommitBatch,
}

impl<'a> EntryAccess<'a> {
    pub fn new(store: &'a dyn EntryStore, unit: &'a UnitConfig, entry: Entry) -> Self {
        Self {
            store,
            unit,
            entry,
            batch: CommitBatch::new(),
        }
    }

    // ---- The entry under dispatch ----

    pub fn key(&self) -> Key {
        self.entry.key
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn value(&self) -> &[u8] {
        &self.entry.value
    }

    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        self.entry.value_str()
    }

    /// Tag snapshot taken when the unit was dispatched.
    pub fn tags(&self) -> &TagSet {
        &self.entry.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.entry.has_tag(tag)
    }

    pub fn unit(&self) -> &UnitConfig {
        self.unit
    }

    // ---- Reads ----

    /// Looks up another entry's value.
    pub fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        self.store.get(key)
    }

    pub fn lookup(&self, key: &Key) -> Result<Option<Entry>, StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        self.store.entry(key)
    }

    pub fn query_by_tags(&self, tags: &[&str]) -> Result<Vec<Key>, StoreError> {
        self.store.query_by_tags(tags)
    }

    // ---- Staged writes ----

    /// Stages a new entry. Use [`Key::SENTINEL`] for collision-free inserts.
    pub fn create(&mut self, tags: TagSet, value: impl Into<Vec<u8>>, key: Key) {
        self.batch.create(tags, value.into(), key);
    }

    /// Stages a value replacement for an existing entry.
    pub fn update(&mut self, key: Key, value: impl Into<Vec<u8>>) {
        self.batch.update(key, value.into());
    }

    /// Stages a tag addition on the entry under dispatch.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let key = self.entry.key;
        self.batch.add_tag(key, tag);
    }

    /// Stages a tag removal on the entry under dispatch.
    pub fn remove_tag(&mut self, tag: impl Into<String>) {
        let key = self.entry.key;
        self.batch.remove_tag(key, tag);
    }

    /// Stages a subscription of the entry under dispatch on `target`.
    pub fn subscribe(&mut self, target: Key, reactivation_tag: impl Into<String>) {
        let key = self.entry.key;
        self.batch.subscribe(key, target, reactivation_tag);
    }

    // ---- Parking ----

    /// Check-then-subscribe on one dependency.
    ///
    /// Returns the target's value if it exists. Otherwise stages the unit's
    /// inactive tag plus a subscription on `target` and returns `None`; the
    /// caller should then return [`crate::unit::Completion::Deferred`].
    pub fn await_key(&mut self, target: Key) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.get(&target)? {
            return Ok(Some(value));
        }
        self.park_on_all(&[target]);
        Ok(None)
    }

    /// Parks on every key in `targets` under the unit's inactive tag.
    ///
    /// The first target to appear clears the tag and makes the entry
    /// eligible again.
    pub fn park_on_all(&mut self, targets: &[Key]) {
        if targets.is_empty() {
            return;
        }
        let tag = self.unit.inactive_tag().to_string();
        self.add_tag(tag.clone());
        for target in targets {
            self.subscribe(*target, tag.clone());
        }
    }

    // ---- Batch ----

    pub fn batch(&self) -> &CommitBatch {
        &self.batch
    }

    pub fn into_batch(self) -> CommitBatch {
        self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use pando_env::{ChainInfo, SystemContext};

    fn key(b: i64) -> Key {
        Key::new(ChainInfo::pack(3, 0, 0), b, 0)
    }

    #[test]
    fn test_await_present_key_stages_nothing() {
        let store = MemoryStore::new(SystemContext::shared());
        store.create(TagSet::new(), b"dep".to_vec(), key(2)).unwrap();
        let unit = UnitConfig::new("u");
        let mut access = EntryAccess::new(&store, &unit, Entry::new(key(1), "w", TagSet::new()));

        assert_eq!(access.await_key(key(2)).unwrap(), Some(b"dep".to_vec()));
        assert!(access.batch().is_empty());
    }

    #[test]
    fn test_await_missing_key_parks() {
        let store = MemoryStore::new(SystemContext::shared());
        let unit = UnitConfig::new("u");
        let mut access = EntryAccess::new(&store, &unit, Entry::new(key(1), "w", TagSet::new()));

        assert_eq!(access.await_key(key(2)).unwrap(), None);
        let batch = access.into_batch();
        assert_eq!(batch.subscriptions().len(), 1);
        assert_eq!(batch.subscriptions()[0].target, key(2));
        assert_eq!(batch.subscriptions()[0].reactivation_tag, "u:inactive");
    }

    #[test]
    fn test_sentinel_lookup_rejected() {
        let store = MemoryStore::new(SystemContext::shared());
        let unit = UnitConfig::new("u");
        let access = EntryAccess::new(&store, &unit, Entry::new(key(1), "w", TagSet::new()));
        assert!(matches!(access.get(&Key::SENTINEL), Err(StoreError::SentinelKey)));
    }
}
