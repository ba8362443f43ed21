//! Runtime - the reference dispatcher driving registered units over a store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Runtime                             │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  Store: EntryStore       Context: PandoContext       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                               │
//! │  ┌────────────────────────┐     ┌──────────────────────────┐ │
//! │  │  ENTRY ROUNDS          │     │  GROUP PHASE             │ │
//! │  │  predicate -> run ->   │ ──> │  GraphIndex -> GAS       │ │
//! │  │  commit -> done/fail   │ <── │  supersteps -> save      │ │
//! │  └────────────────────────┘     └──────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every unit outcome is turned into store tags here. Callers only see
//! [`RuntimeError`] when the store itself cannot be enumerated.
//!
//! # Usage
//!
//! ```ignore
//! use pando_core::{MemoryStore, Runtime, RuntimeConfig, UnitRegistry};
//! use pando_env::SystemContext;
//!
//! let ctx = SystemContext::shared();
//! let store = Arc::new(MemoryStore::new(ctx.clone()));
//! let mut runtime = Runtime::new(store, ctx, UnitRegistry::new(), RuntimeConfig::default());
//! let report = runtime.process()?;
//! ```

use crate::access::EntryAccess;
use crate::gas::GasReport;
use crate::graph::GraphIndex;
use crate::metrics::{DispatchOutcome, DispatchStats};
use crate::unit::{Completion, DynEntryUnit, RegisteredUnit, UnitConfig, UnitError, UnitRegistry};
use pando_env::{EntryStore, Key, PandoContext, StoreError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Configuration for a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on entry rounds per fixpoint (default: 1000)
    pub max_rounds: usize,

    /// Upper bound on supersteps per group computation (default: 10000)
    pub max_supersteps: u64,

    /// Concurrent dispatches in parallel mode (default: 4)
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_rounds: 1000,
            max_supersteps: 10_000,
            workers: 4,
        }
    }
}

impl RuntimeConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_supersteps(mut self, max_supersteps: u64) -> Self {
        self.max_supersteps = max_supersteps;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Errors reported by the runtime itself.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Unknown single-entry unit: {0}")]
    UnknownUnit(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A dispatch task panicked or was cancelled
    #[error("Dispatch task failed: {0}")]
    Join(String),
}

/// Summary of one [`Runtime::process`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    /// Entry rounds that executed at least one unit
    pub rounds: u64,

    /// Unit executions across all rounds
    pub dispatched: u64,

    /// True if every fixpoint settled before `max_rounds`
    pub quiescent: bool,

    pub group_reports: Vec<GasReport>,

    /// Context time spent
    pub elapsed: Duration,
}

/// Offers one entry to one unit and commits the outcome as tags.
///
/// - `Done`: the batch is applied, then the done tag is added
/// - `Deferred`: the batch (wait tag and subscriptions) is applied
/// - `Malformed`: the batch is dropped and the fail tag added
/// - `Invariant` or a rejected batch: the batch is dropped and the fail tag
///   added, logged at error level
/// - `Store`: nothing is written; the entry is retried next round
///
/// Once an entry is done or failed for a unit, its subscriptions still
/// pending under that unit's wait tag are dropped.
pub fn dispatch(
    unit: &dyn DynEntryUnit,
    store: &dyn EntryStore,
    key: &Key,
) -> Result<DispatchOutcome, StoreError> {
    let Some(entry) = store.entry(key)? else {
        return Ok(DispatchOutcome::NoEntry);
    };
    if !unit.eligible(&entry) {
        return Ok(DispatchOutcome::Ineligible);
    }

    let config = unit.config();
    let mut access = EntryAccess::new(store, config, entry);
    let result = unit.run(&mut access);
    let batch = access.into_batch();
    debug!("{} ran on {}: {:?}", config.name(), key, result);

    match result {
        Ok(Completion::Done) => {
            if let Err(e) = batch.apply(store) {
                return abort(store, config, key, &e.to_string());
            }
            // A unit that tagged itself failed is not done
            if store.entry(key)?.is_some_and(|e| e.has_tag(config.fail_tag())) {
                release(store, config, key)?;
                return Ok(DispatchOutcome::Failed);
            }
            store.add_tag(key, config.done_tag())?;
            release(store, config, key)?;
            Ok(DispatchOutcome::Done)
        }
        Ok(Completion::Deferred) => {
            if batch.subscriptions().is_empty() {
                return abort(store, config, key, "deferred without subscribing to anything");
            }
            if let Err(e) = batch.apply(store) {
                return abort(store, config, key, &e.to_string());
            }
            Ok(DispatchOutcome::Deferred)
        }
        Err(UnitError::Malformed(msg)) => {
            warn!("{} rejected {} as malformed: {}", config.name(), key, msg);
            store.add_tag(key, config.fail_tag())?;
            release(store, config, key)?;
            Ok(DispatchOutcome::Failed)
        }
        Err(UnitError::Invariant(msg)) => abort(store, config, key, &msg),
        Err(UnitError::Store(e)) => {
            warn!("{} hit a store error on {}, will retry: {}", config.name(), key, e);
            Ok(DispatchOutcome::Retry)
        }
    }
}

fn abort(
    store: &dyn EntryStore,
    config: &UnitConfig,
    key: &Key,
    reason: &str,
) -> Result<DispatchOutcome, StoreError> {
    error!("{} aborted on {}, staged effects discarded: {}", config.name(), key, reason);
    store.add_tag(key, config.fail_tag())?;
    release(store, config, key)?;
    Ok(DispatchOutcome::Aborted)
}

/// Drops subscriptions left over from an earlier park of a settled entry,
/// such as the unresolved candidates of an any-of join.
fn release(store: &dyn EntryStore, config: &UnitConfig, key: &Key) -> Result<(), StoreError> {
    let dropped = store.unsubscribe(key, config.inactive_tag())?;
    if dropped > 0 {
        debug!("{} released {} stale subscriptions of {}", config.name(), dropped, key);
    }
    Ok(())
}

/// Reference dispatcher over a shared store.
///
/// Generic over the store and context implementations, allowing the same
/// runtime to drive an in-memory store, a sled database or a seeded
/// simulation.
pub struct Runtime<S, C>
where
    S: EntryStore + 'static,
    C: PandoContext,
{
    store: Arc<S>,
    context: Arc<C>,
    registry: UnitRegistry,
    config: RuntimeConfig,
    stats: DispatchStats,
}

impl<S, C> Runtime<S, C>
where
    S: EntryStore + 'static,
    C: PandoContext,
{
    pub fn new(store: Arc<S>, context: Arc<C>, registry: UnitRegistry, config: RuntimeConfig) -> Self {
        info!(
            "Runtime up with {} units (seed {})",
            registry.len(),
            context.seed()
        );
        Self {
            store,
            context,
            registry,
            config,
            stats: DispatchStats::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut UnitRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Re-offers one entry to one single-entry unit.
    pub fn dispatch_entry(&mut self, unit: &str, key: &Key) -> Result<DispatchOutcome, RuntimeError> {
        let unit = match self.registry.get(unit) {
            Some(RegisteredUnit::SingleEntry(u)) => Arc::clone(u),
            _ => return Err(RuntimeError::UnknownUnit(unit.to_string())),
        };
        let outcome = dispatch(unit.as_ref(), self.store.as_ref(), key)?;
        self.stats.record(outcome);
        Ok(outcome)
    }

    /// One round: every single-entry unit over a snapshot of all keys.
    ///
    /// Returns the number of unit executions.
    pub fn process_once(&mut self) -> Result<u64, RuntimeError> {
        let keys = self.store.keys()?;
        let units = self.registry.entry_units();
        let mut ran = 0;
        for key in &keys {
            for unit in &units {
                let outcome = dispatch(unit.as_ref(), self.store.as_ref(), key)?;
                self.stats.record(outcome);
                if outcome.ran() {
                    ran += 1;
                }
            }
        }
        if ran > 0 {
            self.stats.record_round();
        }
        Ok(ran)
    }

    /// Rounds until nothing runs. Returns `(rounds, executions, settled)`.
    fn fixpoint(&mut self) -> Result<(u64, u64, bool), RuntimeError> {
        let mut rounds = 0;
        let mut executions = 0;
        for _ in 0..self.config.max_rounds {
            let ran = self.process_once()?;
            if ran == 0 {
                return Ok((rounds, executions, true));
            }
            rounds += 1;
            executions += ran;
        }
        warn!(
            "Entry dispatch did not settle within {} rounds",
            self.config.max_rounds
        );
        Ok((rounds, executions, false))
    }

    /// Runs every vertex-group unit over every graph in the store.
    ///
    /// Group failures are logged and counted; they never abort the phase.
    pub fn run_group_phase(&mut self) -> Result<Vec<GasReport>, RuntimeError> {
        let units = self.registry.group_units();
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let graphs = GraphIndex::build(self.store.as_ref())?;
        let mut reports = Vec::new();
        for unit in &units {
            for graph in &graphs {
                match unit.compute(graph, self.store.as_ref(), self.config.max_supersteps) {
                    Ok(Some(report)) => {
                        info!(
                            "{} on {}: {} groups, {} supersteps, converged={}",
                            report.unit,
                            report.domain,
                            report.participants,
                            report.supersteps,
                            report.converged
                        );
                        self.stats.record_group(&report);
                        reports.push(report);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(
                            "{} failed on graph {}: {}",
                            unit.config().name(),
                            graph.domain,
                            e
                        );
                        self.stats.record_group_failure();
                    }
                }
            }
        }
        Ok(reports)
    }

    /// Entry fixpoint, group phase, then a second entry fixpoint.
    pub fn process(&mut self) -> Result<ProcessReport, RuntimeError> {
        let start = self.context.now();
        let (r1, d1, q1) = self.fixpoint()?;
        let group_reports = self.run_group_phase()?;
        let (r2, d2, q2) = self.fixpoint()?;

        let report = ProcessReport {
            rounds: r1 + r2,
            dispatched: d1 + d2,
            quiescent: q1 && q2,
            group_reports,
            elapsed: self.context.now().saturating_sub(start),
        };
        info!(
            "Processed {} executions in {} rounds ({} group runs)",
            report.dispatched,
            report.rounds,
            report.group_reports.len()
        );
        Ok(report)
    }

    /// Same rounds as [`Runtime::process`], with each round's work items
    /// run on blocking tasks, at most `workers` at a time.
    pub async fn process_parallel(&mut self) -> Result<ProcessReport, RuntimeError> {
        let start = self.context.now();
        let (r1, d1, q1) = self.parallel_fixpoint().await?;
        let group_reports = self.run_group_phase()?;
        let (r2, d2, q2) = self.parallel_fixpoint().await?;

        Ok(ProcessReport {
            rounds: r1 + r2,
            dispatched: d1 + d2,
            quiescent: q1 && q2,
            group_reports,
            elapsed: self.context.now().saturating_sub(start),
        })
    }

    async fn parallel_fixpoint(&mut self) -> Result<(u64, u64, bool), RuntimeError> {
        let mut rounds = 0;
        let mut executions = 0;
        for _ in 0..self.config.max_rounds {
            let ran = self.parallel_round().await?;
            if ran == 0 {
                return Ok((rounds, executions, true));
            }
            rounds += 1;
            executions += ran;
        }
        warn!(
            "Parallel dispatch did not settle within {} rounds",
            self.config.max_rounds
        );
        Ok((rounds, executions, false))
    }

    async fn parallel_round(&mut self) -> Result<u64, RuntimeError> {
        let units = self.registry.entry_units();

        // Work items are (unit, key) pairs whose predicate holds right now
        let mut work: BTreeSet<(usize, Key)> = BTreeSet::new();
        for entry in self.store.entries()? {
            for (idx, unit) in units.iter().enumerate() {
                if unit.eligible(&entry) {
                    work.insert((idx, entry.key));
                }
            }
        }
        if work.is_empty() {
            return Ok(0);
        }

        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut first_error = None;
        for (idx, key) in work {
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    first_error = Some(RuntimeError::Join(e.to_string()));
                    break;
                }
            };
            let unit = Arc::clone(&units[idx]);
            let store = Arc::clone(&self.store);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                dispatch(unit.as_ref(), store.as_ref(), &key)
            });
        }

        // Every task is joined and counted before an error is reported
        let mut ran = 0;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    first_error.get_or_insert(RuntimeError::Store(e));
                    continue;
                }
                Err(e) => {
                    first_error.get_or_insert(RuntimeError::Join(e.to_string()));
                    continue;
                }
            };
            self.stats.record(outcome);
            if outcome.ran() {
                ran += 1;
            }
        }
        if ran > 0 {
            self.stats.record_round();
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(ran),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfs::{BfsConfig, BreadthFirstDistance};
    use crate::memory_store::MemoryStore;
    use crate::subscription::{FanOutJoin, JoinStatus};
    use crate::unit::EntryUnit;
    use pando_env::{ChainInfo, SystemContext, TagSet};

    const RECORDS: ChainInfo = ChainInfo::pack(1, 1, 0);
    const RATES: ChainInfo = ChainInfo::pack(1, 2, 0);
    const OUTPUT: ChainInfo = ChainInfo::pack(1, 7, 0);

    /// Joins a record with the rate of its `rate=` tag.
    struct Convert {
        config: UnitConfig,
    }

    impl EntryUnit for Convert {
        type State = i64;

        fn config(&self) -> &UnitConfig {
            &self.config
        }

        fn setup(&self, access: &EntryAccess<'_>) -> Result<i64, UnitError> {
            crate::predicate::tag_param(access.tags(), "rate=")
                .ok_or_else(|| UnitError::malformed("missing rate= tag"))
        }

        fn execute(&self, rate: &mut i64, access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
            let amount: i64 = access
                .value_str()
                .trim()
                .parse()
                .map_err(|_| UnitError::malformed("amount is not an integer"))?;
            let Some(raw) = access.await_key(Key::new(RATES, *rate, 0))? else {
                return Ok(Completion::Deferred);
            };
            let factor: i64 = String::from_utf8_lossy(&raw)
                .trim()
                .parse()
                .map_err(|_| UnitError::invariant("rate entry is not an integer"))?;
            let out: TagSet = ["CONVERTED"].into_iter().collect();
            access.create(out, (amount * factor).to_string(), Key::new(OUTPUT, access.key().b, 0));
            Ok(Completion::Done)
        }
    }

    /// Stages an output and parks on the sentinel key, which no store accepts.
    struct ParkOnSentinel {
        config: UnitConfig,
    }

    impl EntryUnit for ParkOnSentinel {
        type State = ();

        fn config(&self) -> &UnitConfig {
            &self.config
        }

        fn setup(&self, _access: &EntryAccess<'_>) -> Result<(), UnitError> {
            Ok(())
        }

        fn execute(&self, _state: &mut (), access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
            let out: TagSet = ["OUT"].into_iter().collect();
            access.create(out, "out", Key::new(OUTPUT, access.key().b, 0));
            let tag = access.unit().inactive_tag().to_string();
            access.add_tag(tag.clone());
            access.subscribe(Key::SENTINEL, tag);
            Ok(Completion::Deferred)
        }
    }

    /// Completes once any of four rate keys exists.
    struct AnyRate {
        config: UnitConfig,
    }

    impl EntryUnit for AnyRate {
        type State = ();

        fn config(&self) -> &UnitConfig {
            &self.config
        }

        fn setup(&self, _access: &EntryAccess<'_>) -> Result<(), UnitError> {
            Ok(())
        }

        fn execute(&self, _state: &mut (), access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
            let candidates = (10..14).map(|b| Key::new(RATES, b, 0)).collect();
            match FanOutJoin::any_of(candidates).poll(access)? {
                JoinStatus::Ready(_) => Ok(Completion::Done),
                JoinStatus::Pending(_) => Ok(Completion::Deferred),
            }
        }
    }

    struct Panicky {
        config: UnitConfig,
    }

    impl EntryUnit for Panicky {
        type State = ();

        fn config(&self) -> &UnitConfig {
            &self.config
        }

        fn setup(&self, _access: &EntryAccess<'_>) -> Result<(), UnitError> {
            Ok(())
        }

        fn execute(&self, _state: &mut (), _access: &mut EntryAccess<'_>) -> Result<Completion, UnitError> {
            panic!("unit blew up");
        }
    }

    fn runtime() -> Runtime<MemoryStore, SystemContext> {
        let ctx = SystemContext::shared();
        let store = Arc::new(MemoryStore::new(ctx.clone()));
        let mut registry = UnitRegistry::new();
        registry.register_entry(Convert {
            config: UnitConfig::new("convert").require("RECORD"),
        });
        Runtime::new(store, ctx, registry, RuntimeConfig::default())
    }

    fn record(rt: &Runtime<MemoryStore, SystemContext>, id: i64, amount: &str, rate: i64) -> Key {
        let key = Key::new(RECORDS, id, 0);
        let tags: TagSet = ["RECORD".to_string(), format!("rate={}", rate)].into_iter().collect();
        rt.store().create(tags, amount.as_bytes().to_vec(), key).unwrap();
        key
    }

    fn tags_of(rt: &Runtime<MemoryStore, SystemContext>, key: &Key) -> TagSet {
        rt.store().entry(key).unwrap().unwrap().tags
    }

    #[test]
    fn test_runtime_config_builders() {
        let config = RuntimeConfig::default()
            .with_max_rounds(5)
            .with_max_supersteps(7)
            .with_workers(0);
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.max_supersteps, 7);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_out_of_order_dependency() {
        let mut rt = runtime();
        let rec = record(&rt, 1, "5", 3);

        rt.process().unwrap();
        let tags = tags_of(&rt, &rec);
        assert!(tags.contains("convert:inactive"));
        assert!(!tags.contains("convert:done"));

        rt.store().create(TagSet::new(), b"10".to_vec(), Key::new(RATES, 3, 0)).unwrap();
        assert!(!tags_of(&rt, &rec).contains("convert:inactive"));

        rt.process().unwrap();
        assert!(tags_of(&rt, &rec).contains("convert:done"));
        assert_eq!(rt.store().get(&Key::new(OUTPUT, 1, 0)).unwrap(), Some(b"50".to_vec()));
    }

    #[test]
    fn test_done_entry_is_not_rerun() {
        let mut rt = runtime();
        rt.store().create(TagSet::new(), b"2".to_vec(), Key::new(RATES, 1, 0)).unwrap();
        let rec = record(&rt, 4, "7", 1);

        rt.process().unwrap();
        let snapshot = rt.store().entries().unwrap();

        assert_eq!(rt.dispatch_entry("convert", &rec).unwrap(), DispatchOutcome::Ineligible);
        rt.process().unwrap();
        assert_eq!(rt.store().entries().unwrap(), snapshot);
    }

    #[test]
    fn test_malformed_input_fails_once() {
        let mut rt = runtime();
        rt.store().create(TagSet::new(), b"2".to_vec(), Key::new(RATES, 1, 0)).unwrap();
        let rec = record(&rt, 2, "not a number", 1);

        rt.process().unwrap();
        let tags = tags_of(&rt, &rec);
        assert!(tags.contains("convert:fail"));
        assert!(!tags.contains("convert:done"));
        assert_eq!(rt.stats().failed, 1);
        assert_eq!(rt.store().get(&Key::new(OUTPUT, 2, 0)).unwrap(), None);

        rt.process().unwrap();
        assert_eq!(rt.stats().failed, 1);
    }

    #[test]
    fn test_invariant_violation_discards_effects() {
        let mut rt = runtime();
        rt.store().create(TagSet::new(), b"abc".to_vec(), Key::new(RATES, 1, 0)).unwrap();
        let rec = record(&rt, 3, "4", 1);

        rt.process().unwrap();
        let tags = tags_of(&rt, &rec);
        assert!(tags.contains("convert:fail"));
        assert!(!tags.contains("convert:done"));
        assert_eq!(rt.stats().invariant_violations, 1);
        assert_eq!(rt.store().get(&Key::new(OUTPUT, 3, 0)).unwrap(), None);
    }

    #[test]
    fn test_rejected_batch_leaves_no_effects() {
        let mut rt = runtime();
        rt.registry_mut().register_entry(ParkOnSentinel {
            config: UnitConfig::new("bad").require("R"),
        });
        let key = Key::new(RECORDS, 8, 0);
        rt.store().create(["R"].into_iter().collect(), b"r".to_vec(), key).unwrap();

        assert_eq!(rt.dispatch_entry("bad", &key).unwrap(), DispatchOutcome::Aborted);
        let tags = tags_of(&rt, &key);
        assert!(tags.contains("bad:fail"));
        assert!(!tags.contains("bad:inactive"));
        assert_eq!(rt.store().get(&Key::new(OUTPUT, 8, 0)).unwrap(), None);
    }

    #[test]
    fn test_any_of_join_releases_other_subscriptions() {
        let mut rt = runtime();
        rt.registry_mut().register_entry(AnyRate {
            config: UnitConfig::new("join").require("PAIR"),
        });
        let pair = Key::new(RECORDS, 50, 0);
        rt.store().create(["PAIR"].into_iter().collect(), vec![], pair).unwrap();

        rt.process().unwrap();
        assert_eq!(rt.store().waiting_on(&pair).unwrap().len(), 4);
        assert_eq!(rt.store().pending_subscriptions().unwrap(), 4);

        rt.store().create(TagSet::new(), b"1".to_vec(), Key::new(RATES, 12, 0)).unwrap();
        rt.process().unwrap();
        assert!(tags_of(&rt, &pair).contains("join:done"));
        assert!(rt.store().waiting_on(&pair).unwrap().is_empty());
        assert_eq!(rt.store().pending_subscriptions().unwrap(), 0);
    }

    #[test]
    fn test_unknown_unit() {
        let mut rt = runtime();
        let err = rt.dispatch_entry("nope", &Key::new(RECORDS, 1, 0)).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownUnit(_)));
        assert_eq!(
            rt.dispatch_entry("convert", &Key::new(RECORDS, 1, 0)).unwrap(),
            DispatchOutcome::NoEntry
        );
    }

    #[test]
    fn test_group_phase_runs_bfs() {
        let mut rt = runtime();
        let edges = ChainInfo::pack(5, 3, 0);
        let distance = ChainInfo::pack(5, 5, 0);
        let seed = ChainInfo::pack(5, 6, 0);
        rt.registry_mut()
            .register_group(BreadthFirstDistance::new("bfs", BfsConfig::new(edges, distance, seed)).into_unit());

        for (b, c) in [(1, 2), (2, 3)] {
            rt.store().create(TagSet::new(), vec![], Key::new(edges, b, c)).unwrap();
        }
        rt.store().create(TagSet::new(), b"0".to_vec(), Key::new(seed, 1, 0)).unwrap();

        let report = rt.process().unwrap();
        assert_eq!(report.group_reports.len(), 1);
        assert!(report.group_reports[0].converged);
        assert_eq!(rt.store().get(&Key::new(distance, 3, 0)).unwrap(), Some(b"2".to_vec()));

        let again = rt.process().unwrap();
        assert!(again.group_reports.is_empty());
    }

    #[test]
    fn test_group_phase_waits_for_seed() {
        let mut rt = runtime();
        let edges = ChainInfo::pack(5, 3, 0);
        let distance = ChainInfo::pack(5, 5, 0);
        let seed = ChainInfo::pack(5, 6, 0);
        rt.registry_mut()
            .register_group(BreadthFirstDistance::new("bfs", BfsConfig::new(edges, distance, seed)).into_unit());

        for (b, c) in [(1, 2), (2, 3)] {
            rt.store().create(TagSet::new(), vec![], Key::new(edges, b, c)).unwrap();
        }
        let early = rt.process().unwrap();
        assert!(early.group_reports.is_empty());
        assert_eq!(rt.store().get(&Key::new(distance, 3, 0)).unwrap(), None);

        rt.store().create(TagSet::new(), b"0".to_vec(), Key::new(seed, 1, 0)).unwrap();
        let late = rt.process().unwrap();
        assert_eq!(late.group_reports.len(), 1);
        assert_eq!(rt.store().get(&Key::new(distance, 3, 0)).unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_parallel_round_joins_every_task_before_failing() {
        let mut rt = runtime();
        rt.registry_mut().register_entry(Panicky {
            config: UnitConfig::new("panicky").require("BOOM"),
        });
        rt.store().create(TagSet::new(), b"2".to_vec(), Key::new(RATES, 0, 0)).unwrap();
        for id in 0..8 {
            record(&rt, id, "1", 0);
        }
        rt.store()
            .create(["BOOM"].into_iter().collect(), vec![], Key::new(OUTPUT, 99, 0))
            .unwrap();

        let err = rt.process_parallel().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Join(_)));
        assert_eq!(rt.stats().done, 8);
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let mut seq = runtime();
        let mut par = runtime();
        for rt in [&seq, &par] {
            for id in 0..20 {
                record(rt, id, &id.to_string(), id % 3);
            }
            rt.store().create(TagSet::new(), b"2".to_vec(), Key::new(RATES, 0, 0)).unwrap();
            rt.store().create(TagSet::new(), b"3".to_vec(), Key::new(RATES, 1, 0)).unwrap();
        }

        seq.process().unwrap();
        let report = par.process_parallel().await.unwrap();
        assert!(report.quiescent);

        assert_eq!(seq.store().entries().unwrap(), par.store().entries().unwrap());
        assert_eq!(par.stats().done, 14);
        assert_eq!(par.stats().deferred, 6);
    }
}
