//! Persistent [`EntryStore`] backed by sled.
//!
//! Layout:
//! - `entries` tree: `Key::to_bytes()` -> JSON-encoded [`Entry`]
//! - `subscriptions` tree: `target ++ watcher ++ tag` -> empty
//!
//! The 24-byte key encoding sorts like [`Key`], so sled iteration order is
//! key order and a target's subscriptions share a byte prefix.

use pando_env::{Entry, EntryStore, Key, PandoContext, StoreError, TagSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

const ENTRIES_TREE: &str = "entries";
const SUBSCRIPTIONS_TREE: &str = "subscriptions";
const KEY_LEN: usize = 24;

/// Sled-based persistent entry store.
///
/// Mutations are serialized through one writer lock, so read-modify-write
/// sequences (merge, tag edits, wake delivery) are atomic to readers.
pub struct SledStore {
    db: sled::Db,
    entries: sled::Tree,
    subscriptions: sled::Tree,
    ctx: Arc<dyn PandoContext>,
    write_lock: Mutex<()>,
}

impl SledStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P, ctx: Arc<dyn PandoContext>) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::storage(format!("Failed to open sled DB: {}", e)))?;
        Self::from_db(db, ctx)
    }

    /// Create a temporary store that is removed on drop
    pub fn temporary(ctx: Arc<dyn PandoContext>) -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| StoreError::storage(format!("Failed to open temp DB: {}", e)))?;
        Self::from_db(db, ctx)
    }

    fn from_db(db: sled::Db, ctx: Arc<dyn PandoContext>) -> Result<Self, StoreError> {
        let entries = db
            .open_tree(ENTRIES_TREE)
            .map_err(|e| StoreError::storage(format!("Failed to open entries tree: {}", e)))?;
        let subscriptions = db
            .open_tree(SUBSCRIPTIONS_TREE)
            .map_err(|e| StoreError::storage(format!("Failed to open subscriptions tree: {}", e)))?;
        Ok(Self {
            db,
            entries,
            subscriptions,
            ctx,
            write_lock: Mutex::new(()),
        })
    }

    /// Flushes dirty buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    /// Subscriptions not yet fired.
    pub fn pending_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    fn load(&self, key: &Key) -> Result<Option<Entry>, StoreError> {
        let raw = self
            .entries
            .get(key.to_bytes())
            .map_err(|e| StoreError::storage(format!("Get failed: {}", e)))?;
        match raw {
            Some(bytes) => {
                let entry = serde_json::from_slice(&bytes).map_err(StoreError::serialization)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn save(&self, entry: &Entry) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(entry).map_err(StoreError::serialization)?;
        self.entries
            .insert(entry.key.to_bytes(), bytes)
            .map_err(|e| StoreError::storage(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    fn contains(&self, key: &Key) -> Result<bool, StoreError> {
        self.entries
            .contains_key(key.to_bytes())
            .map_err(|e| StoreError::storage(format!("Lookup failed: {}", e)))
    }

    /// Loads, mutates and saves one entry. Caller holds the write lock.
    fn modify<F>(&self, key: &Key, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Entry) -> bool,
    {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let mut entry = self.load(key)?.ok_or(StoreError::NotFound(*key))?;
        if f(&mut entry) {
            self.save(&entry)?;
        }
        Ok(())
    }

    fn subscription_key(target: &Key, watcher: &Key, tag: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_LEN * 2 + tag.len());
        out.extend_from_slice(&target.to_bytes());
        out.extend_from_slice(&watcher.to_bytes());
        out.extend_from_slice(tag.as_bytes());
        out
    }

    /// Delivers every wake signal pending on `target`. Caller holds the
    /// write lock.
    fn wake(&self, target: &Key) -> Result<(), StoreError> {
        let mut fired = Vec::new();
        for item in self.subscriptions.scan_prefix(target.to_bytes()) {
            let (raw, _) =
                item.map_err(|e| StoreError::storage(format!("Iteration failed: {}", e)))?;
            fired.push(raw);
        }

        for raw in fired {
            let watcher = Key::from_bytes(&raw[KEY_LEN..KEY_LEN * 2])
                .ok_or_else(|| StoreError::serialization("truncated subscription key"))?;
            let tag = String::from_utf8_lossy(&raw[KEY_LEN * 2..]).into_owned();
            match self.modify(&watcher, |e| e.tags.remove(&tag)) {
                Ok(()) => debug!("Woke {} on {} ({})", watcher, target, tag),
                Err(StoreError::NotFound(_)) => {
                    trace!("Wake for missing watcher {} on {}", watcher, target)
                }
                Err(e) => return Err(e),
            }
            self.subscriptions
                .remove(raw)
                .map_err(|e| StoreError::storage(format!("Remove failed: {}", e)))?;
        }
        Ok(())
    }
}

impl EntryStore for SledStore {
    fn create(&self, tags: TagSet, value: Vec<u8>, key: Key) -> Result<Key, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let key = if key.is_sentinel() {
            loop {
                let candidate = self.ctx.random_key();
                if !candidate.is_sentinel() && !self.contains(&candidate)? {
                    break candidate;
                }
            }
        } else {
            key
        };

        let incoming = Entry::new(key, value, tags);
        let stored = match self.load(&key)? {
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

        self.save(&stored)?;
        self.wake(&key)?;
        Ok(key)
    }

    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        Ok(self.load(key)?.map(|e| e.value))
    }

    fn entry(&self, key: &Key) -> Result<Option<Entry>, StoreError> {
        if key.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        self.load(key)
    }

    fn update(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.modify(key, |e| {
            e.value = value;
            true
        })
    }

    fn add_tag(&self, key: &Key, tag: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.modify(key, |e| e.tags.insert(tag))
    }

    fn remove_tag(&self, key: &Key, tag: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.modify(key, |e| e.tags.remove(tag))
    }

    fn subscribe(&self, watcher: Key, target: Key, reactivation_tag: &str) -> Result<(), StoreError> {
        if watcher.is_sentinel() || target.is_sentinel() {
            return Err(StoreError::SentinelKey);
        }
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        if self.contains(&target)? {
            match self.modify(&watcher, |e| e.tags.remove(reactivation_tag)) {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            debug!("Subscription of {} on existing {} fired immediately", watcher, target);
            return Ok(());
        }
        self.subscriptions
            .insert(Self::subscription_key(&target, &watcher, reactivation_tag), &[] as &[u8])
            .map_err(|e| StoreError::storage(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    /// Full scan of the subscriptions tree, which is keyed by target.
    fn unsubscribe(&self, watcher: &Key, reactivation_tag: &str) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let watcher = watcher.to_bytes();
        let mut dropped = Vec::new();
        for item in self.subscriptions.iter() {
            let (raw, _) =
                item.map_err(|e| StoreError::storage(format!("Iteration failed: {}", e)))?;
            if raw.len() >= KEY_LEN * 2
                && raw[KEY_LEN..KEY_LEN * 2] == watcher[..]
                && &raw[KEY_LEN * 2..] == reactivation_tag.as_bytes()
            {
                dropped.push(raw);
            }
        }
        let count = dropped.len();
        for raw in dropped {
            self.subscriptions
                .remove(raw)
                .map_err(|e| StoreError::storage(format!("Remove failed: {}", e)))?;
        }
        Ok(count)
    }

    /// Full scan: sled keeps no secondary tag index.
    fn query_by_tags(&self, tags: &[&str]) -> Result<Vec<Key>, StoreError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in self.entries()? {
            if tags.iter().all(|t| entry.has_tag(t)) {
                out.push(entry.key);
            }
        }
        Ok(out)
    }

    fn keys(&self) -> Result<Vec<Key>, StoreError> {
        let mut keys = Vec::new();
        for item in self.entries.iter().keys() {
            let raw = item.map_err(|e| StoreError::storage(format!("Iteration failed: {}", e)))?;
            if let Some(key) = Key::from_bytes(&raw) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }

    fn entries(&self) -> Result<Vec<Entry>, StoreError> {
        let mut out = Vec::new();
        for item in self.entries.iter().values() {
            let bytes = item.map_err(|e| StoreError::storage(format!("Iteration failed: {}", e)))?;
            out.push(serde_json::from_slice(&bytes).map_err(StoreError::serialization)?);
        }
        Ok(out)
    }
}
