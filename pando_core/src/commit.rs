//! Staged unit effects and their ordered application to a store.

use pando_env::{EntryStore, Key, StoreError, TagSet};
use serde::Serialize;
use tracing::debug;

/// An entry staged for creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCreate {
    pub key: Key,
    pub tags: TagSet,
    pub value: Vec<u8>,
}

/// A subscription staged for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSubscription {
    pub watcher: Key,
    pub target: Key,
    pub reactivation_tag: String,
}

/// Effects recorded by one unit invocation.
///
/// Nothing reaches the store until [`CommitBatch::apply`]. Effects are
/// applied in a fixed order: creates, value updates, tag additions, tag
/// removals, subscriptions. Subscriptions go last so that a target created
/// by the same batch, or one that already exists, wakes the watcher after
/// its wait tag has been written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    creates: Vec<StagedCreate>,
    updates: Vec<(Key, Vec<u8>)>,
    tag_adds: Vec<(Key, String)>,
    tag_removes: Vec<(Key, String)>,
    subscriptions: Vec<StagedSubscription>,
}

/// What a batch did once applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Keys the creates were stored under, sentinels resolved
    pub created: Vec<Key>,
    pub updated: usize,
    pub tags_added: usize,
    pub tags_removed: usize,
    pub subscriptions: usize,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, tags: TagSet, value: Vec<u8>, key: Key) {
        self.creates.push(StagedCreate { key, tags, value });
    }

    pub fn update(&mut self, key: Key, value: Vec<u8>) {
        self.updates.push((key, value));
    }

    pub fn add_tag(&mut self, key: Key, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tag_adds.iter().any(|(k, t)| *k == key && *t == tag) {
            self.tag_adds.push((key, tag));
        }
    }

    pub fn remove_tag(&mut self, key: Key, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tag_removes.iter().any(|(k, t)| *k == key && *t == tag) {
            self.tag_removes.push((key, tag));
        }
    }

    pub fn subscribe(&mut self, watcher: Key, target: Key, reactivation_tag: impl Into<String>) {
        let sub = StagedSubscription {
            watcher,
            target,
            reactivation_tag: reactivation_tag.into(),
        };
        if !self.subscriptions.contains(&sub) {
            self.subscriptions.push(sub);
        }
    }

    pub fn creates(&self) -> &[StagedCreate] {
        &self.creates
    }

    pub fn subscriptions(&self) -> &[StagedSubscription] {
        &self.subscriptions
    }

    /// True if `key` would exist after this batch is applied to `store`.
    fn resolves(&self, store: &dyn EntryStore, key: &Key) -> Result<bool, StoreError> {
        if self.creates.iter().any(|c| c.key == *key) {
            return Ok(true);
        }
        Ok(store.get(key)?.is_some())
    }

    /// Number of staged effects.
    pub fn len(&self) -> usize {
        self.creates.len()
            + self.updates.len()
            + self.tag_adds.len()
            + self.tag_removes.len()
            + self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks every staged effect against `store` without writing.
    ///
    /// Updates, tag changes and subscription watchers must name a key that
    /// exists or is created by this batch. No effect may name the sentinel
    /// key except a create.
    pub fn validate(&self, store: &dyn EntryStore) -> Result<(), StoreError> {
        let targets = self
            .updates
            .iter()
            .map(|(key, _)| key)
            .chain(self.tag_adds.iter().map(|(key, _)| key))
            .chain(self.tag_removes.iter().map(|(key, _)| key))
            .chain(self.subscriptions.iter().map(|sub| &sub.watcher));
        for key in targets {
            if key.is_sentinel() {
                return Err(StoreError::SentinelKey);
            }
            if !self.resolves(store, key)? {
                return Err(StoreError::NotFound(*key));
            }
        }
        if self.subscriptions.iter().any(|sub| sub.target.is_sentinel()) {
            return Err(StoreError::SentinelKey);
        }
        Ok(())
    }

    /// Applies every staged effect in order.
    ///
    /// The whole batch is validated first: if any effect would be rejected
    /// by the store, nothing is written.
    pub fn apply(self, store: &dyn EntryStore) -> Result<CommitSummary, StoreError> {
        self.validate(store)?;

        let mut summary = CommitSummary::default();

        for create in self.creates {
            let key = store.create(create.tags, create.value, create.key)?;
            summary.created.push(key);
        }
        for (key, value) in self.updates {
            store.update(&key, value)?;
            summary.updated += 1;
        }
        for (key, tag) in self.tag_adds {
            store.add_tag(&key, &tag)?;
            summary.tags_added += 1;
        }
        for (key, tag) in self.tag_removes {
            store.remove_tag(&key, &tag)?;
            summary.tags_removed += 1;
        }
        for sub in self.subscriptions {
            store.subscribe(sub.watcher, sub.target, &sub.reactivation_tag)?;
            summary.subscriptions += 1;
        }

        debug!(
            "Committed batch: {} created, {} updated, +{} / -{} tags, {} subscriptions",
            summary.created.len(),
            summary.updated,
            summary.tags_added,
            summary.tags_removed,
            summary.subscriptions
        );
        Ok(summary)
    }
}
