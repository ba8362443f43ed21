//! Bulk entry loading and JSON snapshots.
//!
//! The text format is line oriented:
//!
//! ```text
//! TAGS
//! BTC
//! TX
//! VALUE
//! {"txid": "ab12"}
//! END
//! ```
//!
//! Lines outside a `TAGS` .. `END` block are ignored. Every value line is
//! stored followed by a newline. Loaded entries get random keys.

use pando_env::{Entry, EntryStore, Key, StoreError, TagSet};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input ended inside an entry block
    #[error("Entry starting at line {0} is missing END")]
    Unterminated(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    NoEntry,
    Tags,
    Value,
}

/// Parses the text format into `(tags, value)` pairs.
pub fn parse_entries(text: &str) -> Result<Vec<(TagSet, Vec<u8>)>, LoadError> {
    let mut out = Vec::new();
    let mut state = ParseState::NoEntry;
    let mut tags = TagSet::new();
    let mut value = Vec::new();
    let mut started = 0;

    for (idx, line) in text.lines().enumerate() {
        match state {
            ParseState::NoEntry => {
                if line == "TAGS" {
                    state = ParseState::Tags;
                    started = idx + 1;
                }
            }
            ParseState::Tags => {
                if line == "VALUE" {
                    state = ParseState::Value;
                } else {
                    tags.insert(line);
                }
            }
            ParseState::Value => {
                if line == "END" {
                    out.push((std::mem::take(&mut tags), std::mem::take(&mut value)));
                    state = ParseState::NoEntry;
                } else {
                    value.extend_from_slice(line.as_bytes());
                    value.push(b'\n');
                }
            }
        }
    }

    if state != ParseState::NoEntry {
        return Err(LoadError::Unterminated(started));
    }
    Ok(out)
}

/// Renders entries in the text format. Values are split on newlines.
pub fn format_entries<'a>(entries: impl IntoIterator<Item = (&'a TagSet, &'a [u8])>) -> String {
    let mut out = String::new();
    for (tags, value) in entries {
        out.push_str("TAGS\n");
        for tag in tags.iter() {
            out.push_str(tag);
            out.push('\n');
        }
        out.push_str("VALUE\n");
        let text = String::from_utf8_lossy(value);
        let text = text.strip_suffix('\n').unwrap_or(text.as_ref());
        if !text.is_empty() {
            for line in text.split('\n') {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("END\n");
    }
    out
}

/// Parses `text` and inserts every entry under a fresh random key.
pub fn load_str(store: &dyn EntryStore, text: &str) -> Result<Vec<Key>, LoadError> {
    let mut keys = Vec::new();
    for (tags, value) in parse_entries(text)? {
        keys.push(store.create(tags, value, Key::SENTINEL)?);
    }
    Ok(keys)
}

/// Loads an entry file into the store.
pub fn load_file<P: AsRef<Path>>(store: &dyn EntryStore, path: P) -> Result<Vec<Key>, LoadError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let keys = load_str(store, &text)?;
    info!("Loaded {} entries from {}", keys.len(), path.as_ref().display());
    Ok(keys)
}

/// Serializes every entry as a JSON array.
pub fn export_json(store: &dyn EntryStore) -> Result<String, LoadError> {
    Ok(serde_json::to_string_pretty(&store.entries()?)?)
}

/// Inserts every entry of a JSON array under its recorded key.
///
/// Colliding keys merge like any other create.
pub fn import_json(store: &dyn EntryStore, json: &str) -> Result<usize, LoadError> {
    let entries: Vec<Entry> = serde_json::from_str(json)?;
    let count = entries.len();
    for entry in entries {
        store.create(entry.tags, entry.value, entry.key)?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::sled_store::SledStore;
    use pando_env::{ChainInfo, SystemContext};

    const SAMPLE: &str = "\
ignored preamble
TAGS
BTC
TX
VALUE
line one
line two
END
TAGS
VALUE
END
";

    #[test]
    fn test_parse_entries() {
        let parsed = parse_entries(SAMPLE).unwrap();
        assert_eq!(parsed.len(), 2);

        let (tags, value) = &parsed[0];
        assert!(tags.contains("BTC") && tags.contains("TX"));
        assert_eq!(value, b"line one\nline two\n");

        assert!(parsed[1].0.is_empty());
        assert!(parsed[1].1.is_empty());
    }

    #[test]
    fn test_unterminated_entry() {
        let err = parse_entries("x\nTAGS\nA\nVALUE\nv\n").unwrap_err();
        assert!(matches!(err, LoadError::Unterminated(2)));
    }

    #[test]
    fn test_format_then_parse() {
        let tags: TagSet = ["A", "B"].into_iter().collect();
        let text = format_entries([(&tags, &b"x\ny\n"[..])]);
        assert_eq!(text, "TAGS\nA\nB\nVALUE\nx\ny\nEND\n");
        assert_eq!(parse_entries(&text).unwrap(), vec![(tags, b"x\ny\n".to_vec())]);
    }

    #[test]
    fn test_load_str_uses_random_keys() {
        let store = MemoryStore::new(SystemContext::shared());
        let keys = load_str(&store, SAMPLE).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.is_random() && !k.is_sentinel()));
        assert_eq!(store.query_by_tags(&["BTC"]).unwrap(), vec![keys[0]]);
    }

    #[test]
    fn test_export_import_between_stores() {
        let ctx = SystemContext::shared();
        let memory = MemoryStore::new(ctx.clone());
        let tags: TagSet = ["X"].into_iter().collect();
        memory.create(tags, b"v".to_vec(), Key::new(ChainInfo::pack(1, 2, 3), 4, 5)).unwrap();
        load_str(&memory, SAMPLE).unwrap();

        let json = export_json(&memory).unwrap();
        let sled = SledStore::temporary(ctx).unwrap();
        assert_eq!(import_json(&sled, &json).unwrap(), 3);
        assert_eq!(sled.entries().unwrap(), memory.entries().unwrap());
    }
}
