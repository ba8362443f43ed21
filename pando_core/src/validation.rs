//! Validation Module - Store Audits
//! ================================
//!
//! Checks the tag-level invariants of a store against the registered units:
//! - **Terminal exclusivity**: no entry holds both `<unit>:done` and `<unit>:fail`
//! - **Waiting entries**: entries still carrying `<unit>:inactive`, i.e. parked
//!   on a dependency that has not appeared yet
//!
//! Usage:
//! ```ignore
//! use pando_core::validation::StoreAudit;
//!
//! let audit = StoreAudit::run(store.as_ref(), &registry.configs())?;
//! assert!(audit.is_clean());
//! ```

use crate::unit::UnitConfig;
use pando_env::{EntryStore, Key, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// FINDINGS
// =============================================================================

/// An entry that is both done and failed for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalConflict {
    pub key: Key,
    pub unit: String,
}

/// An entry still parked for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingEntry {
    pub key: Key,
    pub unit: String,
}

// =============================================================================
// AUDIT
// =============================================================================

/// Result of auditing a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreAudit {
    pub entries: usize,
    pub conflicts: Vec<TerminalConflict>,
    pub waiting: Vec<WaitingEntry>,
    /// Per unit: entries tagged done
    pub done: BTreeMap<String, usize>,
    /// Per unit: entries tagged fail
    pub failed: BTreeMap<String, usize>,
}

impl StoreAudit {
    pub fn run(store: &dyn EntryStore, units: &[UnitConfig]) -> Result<Self, StoreError> {
        let mut audit = StoreAudit::default();
        for entry in store.entries()? {
            audit.entries += 1;
            for unit in units {
                let done = entry.has_tag(unit.done_tag());
                let fail = entry.has_tag(unit.fail_tag());
                if done {
                    *audit.done.entry(unit.name().to_string()).or_default() += 1;
                }
                if fail {
                    *audit.failed.entry(unit.name().to_string()).or_default() += 1;
                }
                if done && fail {
                    audit.conflicts.push(TerminalConflict {
                        key: entry.key,
                        unit: unit.name().to_string(),
                    });
                }
                if entry.has_tag(unit.inactive_tag()) {
                    audit.waiting.push(WaitingEntry {
                        key: entry.key,
                        unit: unit.name().to_string(),
                    });
                }
            }
        }
        Ok(audit)
    }

    /// True if no terminal conflict was found. Waiting entries are legal.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn done_count(&self, unit: &str) -> usize {
        self.done.get(unit).copied().unwrap_or(0)
    }

    pub fn failed_count(&self, unit: &str) -> usize {
        self.failed.get(unit).copied().unwrap_or(0)
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} entries, {} conflicts, {} waiting, {} done, {} failed",
            self.entries,
            self.conflicts.len(),
            self.waiting.len(),
            self.done.values().sum::<usize>(),
            self.failed.values().sum::<usize>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use pando_env::{ChainInfo, SystemContext, TagSet};

    fn key(b: i64) -> Key {
        Key::new(ChainInfo::pack(1, 0, 0), b, 0)
    }

    fn tags(list: &[&str]) -> TagSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_audit_finds_conflicts_and_waiting() {
        let store = MemoryStore::new(SystemContext::shared());
        store.create(tags(&["u:done"]), vec![], key(1)).unwrap();
        store.create(tags(&["u:done", "u:fail"]), vec![], key(2)).unwrap();
        store.create(tags(&["u:inactive"]), vec![], key(3)).unwrap();
        store.create(tags(&["v:fail"]), vec![], key(4)).unwrap();

        let units = [UnitConfig::new("u"), UnitConfig::new("v")];
        let audit = StoreAudit::run(&store, &units).unwrap();

        assert_eq!(audit.entries, 4);
        assert!(!audit.is_clean());
        assert_eq!(
            audit.conflicts,
            vec![TerminalConflict {
                key: key(2),
                unit: "u".to_string()
            }]
        );
        assert_eq!(audit.waiting.len(), 1);
        assert_eq!(audit.done_count("u"), 2);
        assert_eq!(audit.failed_count("u"), 1);
        assert_eq!(audit.failed_count("v"), 1);
        assert_eq!(audit.done_count("v"), 0);
    }

    #[test]
    fn test_empty_store_is_clean() {
        let store = MemoryStore::new(SystemContext::shared());
        let audit = StoreAudit::run(&store, &[UnitConfig::new("u")]).unwrap();
        assert!(audit.is_clean());
        assert_eq!(audit.summary(), "0 entries, 0 conflicts, 0 waiting, 0 done, 0 failed");
    }
}
