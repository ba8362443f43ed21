//! The entry store contract consumed by units and the dispatcher.

use crate::error::StoreError;
use crate::key::Key;
use crate::types::{Entry, TagSet};

/// Keyed, tagged value store.
///
/// Every method is synchronous and individually atomic: a concurrent reader
/// never observes a partially applied operation. Per-key operations are
/// serialized by the implementation; no ordering is implied across keys.
///
/// # Implementations
///
/// - **In-memory**: `pando_core::MemoryStore`
/// - **Persistent**: `pando_core::SledStore`
///
/// # Subscriptions
///
/// ```text
/// watcher W                 store                     creator
///   |-- get(T) -> None ------->|                          |
///   |-- add_tag(W, wait) ----->|                          |
///   |-- subscribe(W, T, wait)->|                          |
///   |                          |<------- create(T) -------|
///   |                          |-- remove_tag(W, wait)    |
///   |  (W eligible again)      |                          |
/// ```
pub trait EntryStore: Send + Sync {
    /// Inserts a new entry.
    ///
    /// With [`Key::SENTINEL`] the key is resolved to a fresh random key and
    /// never collision-checked. Returns the key the entry was stored under.
    /// Creating an existing key merges the two entries unless they are
    /// identical.
    fn create(&self, tags: TagSet, value: Vec<u8>, key: Key) -> Result<Key, StoreError>;

    /// Returns the current value, or `None` if the key is absent.
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns a full snapshot of one entry.
    fn entry(&self, key: &Key) -> Result<Option<Entry>, StoreError>;

    /// Replaces the value of an existing entry.
    fn update(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError>;

    /// Adds a tag to an existing entry. Adding a present tag is a no-op.
    fn add_tag(&self, key: &Key, tag: &str) -> Result<(), StoreError>;

    /// Removes a tag from an existing entry. Removing an absent tag is a no-op.
    fn remove_tag(&self, key: &Key, tag: &str) -> Result<(), StoreError>;

    /// Registers `watcher` to have `reactivation_tag` removed once `target`
    /// exists.
    ///
    /// If `target` already exists at the time of the call the wake signal is
    /// delivered immediately. Duplicate subscriptions are collapsed.
    fn subscribe(&self, watcher: Key, target: Key, reactivation_tag: &str) -> Result<(), StoreError>;

    /// Drops every pending subscription of `watcher` under
    /// `reactivation_tag`. Returns how many were dropped.
    fn unsubscribe(&self, watcher: &Key, reactivation_tag: &str) -> Result<usize, StoreError>;

    /// Returns every key carrying all of `tags`. An empty query matches nothing.
    fn query_by_tags(&self, tags: &[&str]) -> Result<Vec<Key>, StoreError>;

    /// Returns all keys in key order.
    fn keys(&self) -> Result<Vec<Key>, StoreError>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Returns a snapshot of every entry in key order.
    fn entries(&self) -> Result<Vec<Entry>, StoreError> {
        let mut out = Vec::new();
        for key in self.keys()? {
            if let Some(entry) = self.entry(&key)? {
                out.push(entry);
            }
        }
        Ok(out)
    }
}
