//! Common types for the Pando entry store.

use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tag marking an entry created by merging two colliding inserts.
pub const MERGED_TAG: &str = "MERGED";

/// Tag forcing a merge even when two colliding entries are identical.
pub const FORCE_MERGE_TAG: &str = "MERGE_STRATEGY=FORCE_MERGE";

/// Ordered set of tags attached to an entry.
///
/// Matching is exact and case-sensitive. Iteration order is lexicographic,
/// but nothing in the engine relies on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// Inserts a tag, returning true if it was not already present.
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    /// Removes a tag, returning true if it was present.
    pub fn remove(&mut self, tag: &str) -> bool {
        self.0.remove(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the suffix of the first tag starting with `prefix`.
    ///
    /// Used for parameterized tags such as `"from=42"`.
    pub fn value_of(&self, prefix: &str) -> Option<&str> {
        self.0.iter().find_map(|tag| tag.strip_prefix(prefix))
    }

    pub fn union(&self, other: &TagSet) -> TagSet {
        TagSet(self.0.union(&other.0).cloned().collect())
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A stored `(key, value, tags)` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub value: Vec<u8>,
    pub tags: TagSet,
}

impl Entry {
    pub fn new(key: Key, value: impl Into<Vec<u8>>, tags: TagSet) -> Self {
        Self {
            key,
            value: value.into(),
            tags,
        }
    }

    /// Value interpreted as UTF-8, lossy.
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// True if two entries carry the same value and tags. Keys are ignored.
    pub fn same_content(&self, other: &Entry) -> bool {
        self.value == other.value && self.tags == other.tags
    }

    /// Decides whether a colliding insert must be merged into `self`.
    pub fn should_merge_with(&self, incoming: &Entry) -> bool {
        !self.same_content(incoming)
            || self.has_tag(FORCE_MERGE_TAG)
            || incoming.has_tag(FORCE_MERGE_TAG)
    }

    /// Concatenates values with a newline and unions the tags, adding `MERGED`.
    pub fn merged_with(&self, incoming: &Entry) -> Entry {
        let mut value = self.value.clone();
        value.push(b'\n');
        value.extend_from_slice(&incoming.value);

        let mut tags = self.tags.union(&incoming.tags);
        tags.insert(MERGED_TAG);

        Entry {
            key: self.key,
            value,
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ChainInfo;

    fn key() -> Key {
        Key::new(ChainInfo::pack(10, 10, 10), 10, 10)
    }

    #[test]
    fn test_tag_prefix_decoding() {
        let tags: TagSet = ["from=42", "BTC"].into_iter().collect();
        assert_eq!(tags.value_of("from="), Some("42"));
        assert_eq!(tags.value_of("to="), None);
    }

    #[test]
    fn test_identical_entries_do_not_merge() {
        let a = Entry::new(key(), "foo", ["x"].into_iter().collect());
        let b = a.clone();
        assert!(!a.should_merge_with(&b));
    }

    #[test]
    fn test_force_merge_tag() {
        let a = Entry::new(key(), "foo", [FORCE_MERGE_TAG].into_iter().collect());
        let b = a.clone();
        assert!(a.should_merge_with(&b));
    }

    #[test]
    fn test_merge_concatenates() {
        let a = Entry::new(key(), "foo", ["a"].into_iter().collect());
        let b = Entry::new(key(), "bar", ["b"].into_iter().collect());

        let merged = a.merged_with(&b);
        assert_eq!(merged.value_str(), "foo\nbar");
        assert!(merged.has_tag("a"));
        assert!(merged.has_tag("b"));
        assert!(merged.has_tag(MERGED_TAG));
        assert_eq!(merged.key, key());
    }
}
