//! Unit dispatch contract and the startup-time unit registry.
//!
//! A unit is either a single-entry unit, run against one entry at a time, or
//! a vertex-group unit, run over whole graphs by the GAS engine. Units never
//! signal success or failure by returning across the dispatch boundary into
//! caller code; the dispatcher turns every outcome into store tags.

use crate::access::EntryAccess;
use crate::gas::GasReport;
use crate::graph::Graph;
use crate::predicate::TagPredicate;
use pando_env::{Entry, EntryStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors a unit may raise while executing.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The entry's payload cannot be processed. Permanent.
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// A programming invariant was broken. The unit's staged effects are
    /// discarded.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// The store failed underneath the unit. Transient.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl UnitError {
    /// Creates a malformed-input error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Creates an invariant-violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

/// Which dispatch path a unit takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitVariant {
    SingleEntry,
    VertexGroup,
}

/// How a single-entry execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Terminal success; the dispatcher adds the unit's done tag
    Done,

    /// Parked on a dependency; the wait tag and subscription are staged
    Deferred,
}

/// Per-unit configuration, built once at registration.
///
/// Owns the unit's reserved tags and its eligibility predicate. The
/// predicate always excludes the done, fail and inactive tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfig {
    name: String,
    done_tag: String,
    fail_tag: String,
    inactive_tag: String,
    speculative_tag: String,
    predicate: TagPredicate,
}

impl UnitConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let done_tag = format!("{}:done", name);
        let fail_tag = format!("{}:fail", name);
        let inactive_tag = format!("{}:inactive", name);
        let speculative_tag = format!("{}:speculative", name);
        let predicate = TagPredicate::new()
            .exclude(done_tag.clone())
            .exclude(fail_tag.clone())
            .exclude(inactive_tag.clone());

        Self {
            name,
            done_tag,
            fail_tag,
            inactive_tag,
            speculative_tag,
            predicate,
        }
    }

    /// Adds a tag the entry must carry.
    pub fn require(mut self, tag: impl Into<String>) -> Self {
        self.predicate = self.predicate.require(tag);
        self
    }

    /// Adds a tag the entry must not carry.
    pub fn exclude(mut self, tag: impl Into<String>) -> Self {
        self.predicate = self.predicate.exclude(tag);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn done_tag(&self) -> &str {
        &self.done_tag
    }

    pub fn fail_tag(&self) -> &str {
        &self.fail_tag
    }

    pub fn inactive_tag(&self) -> &str {
        &self.inactive_tag
    }

    /// Tag for completion signalled before convergence. Never implies done.
    pub fn speculative_tag(&self) -> &str {
        &self.speculative_tag
    }

    pub fn predicate(&self) -> &TagPredicate {
        &self.predicate
    }
}

/// A unit run against one entry at a time.
///
/// `setup` builds per-invocation state, `execute` does the work and
/// `teardown` consumes the state. Units without state use `()`.
///
/// Execution must tolerate at-least-once delivery. Repeat invocations after
/// completion are filtered by [`EntryUnit::eligible`], which by default
/// evaluates [`UnitConfig::predicate`].
pub trait EntryUnit: Send + Sync + 'static {
    type State: Send;

    fn config(&self) -> &UnitConfig;

    /// Pure function of the entry snapshot.
    fn eligible(&self, entry: &Entry) -> bool {
        self.config().predicate().eligible(&entry.tags)
    }

    fn setup(&self, access: &EntryAccess<'_>) -> Result<Self::State, UnitError>;

    fn execute(
        &self,
        state: &mut Self::State,
        access: &mut EntryAccess<'_>,
    ) -> Result<Completion, UnitError>;

    fn teardown(&self, _state: Self::State) {}
}

/// Object-safe view of an [`EntryUnit`], used by the registry.
pub trait DynEntryUnit: Send + Sync {
    fn config(&self) -> &UnitConfig;

    fn eligible(&self, entry: &Entry) -> bool;

    /// Runs the full setup / execute / teardown lifecycle.
    fn run(&self, access: &mut EntryAccess<'_>) -> Result<Completion, UnitError>;
}

impl<U: EntryUnit> DynEntryUnit for U {
    fn config(&self) -> &UnitConfig {
        EntryUnit::config(self)
    }

    fn eligible(&self, entry: &Entry) -> bool {
        EntryUnit::eligible(self, entry)
    }

    fn run(&self, access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
        let mut state = self.setup(access)?;
        let result = self.execute(&mut state, access);
        self.teardown(state);
        result
    }
}

/// A unit run over vertex groups by the superstep engine.
///
/// Implemented by [`crate::gas::GasUnit`] for every GAS program.
pub trait GroupUnit: Send + Sync {
    fn config(&self) -> &UnitConfig;

    /// Runs the computation over every eligible group of `graph`.
    ///
    /// Returns `Ok(None)` when no group of the graph is eligible.
    fn compute(
        &self,
        graph: &Graph,
        store: &dyn EntryStore,
        max_supersteps: u64,
    ) -> Result<Option<GasReport>, crate::gas::GasError>;
}

/// A registered unit of either variant.
#[derive(Clone)]
pub enum RegisteredUnit {
    SingleEntry(Arc<dyn DynEntryUnit>),
    VertexGroup(Arc<dyn GroupUnit>),
}

impl RegisteredUnit {
    pub fn variant(&self) -> UnitVariant {
        match self {
            RegisteredUnit::SingleEntry(_) => UnitVariant::SingleEntry,
            RegisteredUnit::VertexGroup(_) => UnitVariant::VertexGroup,
        }
    }

    pub fn config(&self) -> &UnitConfig {
        match self {
            RegisteredUnit::SingleEntry(u) => u.config(),
            RegisteredUnit::VertexGroup(u) => u.config(),
        }
    }
}

/// Name-keyed registry of installed units.
///
/// Iteration is in name order so that dispatch is reproducible.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: BTreeMap<String, RegisteredUnit>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a single-entry unit, replacing any unit of the same name.
    pub fn register_entry<U: EntryUnit>(&mut self, unit: U) -> &mut Self {
        self.insert(RegisteredUnit::SingleEntry(Arc::new(unit)))
    }

    /// Installs a vertex-group unit, replacing any unit of the same name.
    pub fn register_group<G: GroupUnit + 'static>(&mut self, unit: G) -> &mut Self {
        self.insert(RegisteredUnit::VertexGroup(Arc::new(unit)))
    }

    fn insert(&mut self, unit: RegisteredUnit) -> &mut Self {
        let name = unit.config().name().to_string();
        if self.units.insert(name.clone(), unit).is_some() {
            warn!("Unit \"{}\" already registered, updating it", name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredUnit> {
        self.units.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RegisteredUnit> {
        self.units.remove(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Registered names with their declared variant.
    pub fn names(&self) -> Vec<(String, UnitVariant)> {
        self.units
            .iter()
            .map(|(name, unit)| (name.clone(), unit.variant()))
            .collect()
    }

    pub fn entry_units(&self) -> Vec<Arc<dyn DynEntryUnit>> {
        self.units
            .values()
            .filter_map(|u| match u {
                RegisteredUnit::SingleEntry(unit) => Some(Arc::clone(unit)),
                RegisteredUnit::VertexGroup(_) => None,
            })
            .collect()
    }

    pub fn group_units(&self) -> Vec<Arc<dyn GroupUnit>> {
        self.units
            .values()
            .filter_map(|u| match u {
                RegisteredUnit::VertexGroup(unit) => Some(Arc::clone(unit)),
                RegisteredUnit::SingleEntry(_) => None,
            })
            .collect()
    }

    /// Reserved-tag configurations of every unit, for auditing.
    pub fn configs(&self) -> Vec<UnitConfig> {
        self.units.values().map(|u| u.config().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pando_env::{ChainInfo, Key, TagSet};

    struct Noop {
        config: UnitConfig,
    }

    impl EntryUnit for Noop {
        type State = ();

        fn config(&self) -> &UnitConfig {
            &self.config
        }

        fn setup(&self, _access: &EntryAccess<'_>) -> Result<(), UnitError> {
            Ok(())
        }

        fn execute(&self, _state: &mut (), _access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
            Ok(Completion::Done)
        }
    }

    fn entry(tags: &[&str]) -> Entry {
        let tags: TagSet = tags.iter().copied().collect();
        Entry::new(Key::new(ChainInfo::pack(1, 0, 0), 1, 1), "v", tags)
    }

    #[test]
    fn test_reserved_tags() {
        let config = UnitConfig::new("BTC_tx_vals");
        assert_eq!(config.done_tag(), "BTC_tx_vals:done");
        assert_eq!(config.fail_tag(), "BTC_tx_vals:fail");
        assert_eq!(config.inactive_tag(), "BTC_tx_vals:inactive");
        assert_eq!(config.speculative_tag(), "BTC_tx_vals:speculative");
    }

    #[test]
    fn test_predicate_excludes_own_tags() {
        let unit = Noop {
            config: UnitConfig::new("noop").require("TX"),
        };

        assert!(EntryUnit::eligible(&unit, &entry(&["TX"])));
        assert!(!EntryUnit::eligible(&unit, &entry(&["TX", "noop:done"])));
        assert!(!EntryUnit::eligible(&unit, &entry(&["TX", "noop:fail"])));
        assert!(!EntryUnit::eligible(&unit, &entry(&["TX", "noop:inactive"])));
        assert!(EntryUnit::eligible(&unit, &entry(&["TX", "other:done"])));
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let mut registry = UnitRegistry::new();
        registry.register_entry(Noop { config: UnitConfig::new("a") });
        registry.register_entry(Noop { config: UnitConfig::new("b") });
        registry.register_entry(Noop { config: UnitConfig::new("a").require("X") });

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.entry_units().len(), 2);
        assert!(registry.group_units().is_empty());
        assert_eq!(
            registry.names(),
            vec![
                ("a".to_string(), UnitVariant::SingleEntry),
                ("b".to_string(), UnitVariant::SingleEntry)
            ]
        );
        let a = registry.get("a").map(|u| u.config().predicate().required_all.clone());
        assert_eq!(a, Some(vec!["X".to_string()]));
    }
}
