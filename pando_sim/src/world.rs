//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::oracle::{GraphSpec, Oracle, PairSpec, Workload};
use crate::units::{
    rate_key, tx_subgraph_program, tx_subgraph_search, ShapeShiftPairs, TxRecord, TxValues, BTC, TX_EDGE_KIND,
};

use pando_core::loader::{self, LoadError};
use pando_core::{
    MemoryStore, ProcessReport, Runtime, RuntimeConfig, RuntimeError, StoreAudit, UnitError,
    UnitRegistry,
};
use pando_env::{ChainInfo, EntryStore, Key, StoreError, TagSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Virtual time charged per processing pass.
const PASS_DURATION: Duration = Duration::from_millis(10);

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Transaction records (and pair requests) per workload
    pub records: usize,

    /// Vertices of the generated transaction graph
    pub graph_vertices: usize,

    /// Random edges added on top of the graph's spanning edges
    pub extra_edges: usize,

    /// Times every entry is re-offered to every unit after settling
    pub duplicate_dispatch: usize,

    /// Concurrent dispatches in parallel mode
    pub workers: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            records: 40,
            graph_vertices: 64,
            extra_edges: 32,
            duplicate_dispatch: 2,
            workers: 4,
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_records(mut self, records: usize) -> Self {
        self.records = records;
        self
    }

    pub fn with_graph(mut self, vertices: usize, extra_edges: usize) -> Self {
        self.graph_vertices = vertices;
        self.extra_edges = extra_edges;
        self
    }

    pub fn with_duplicate_dispatch(mut self, times: usize) -> Self {
        self.duplicate_dispatch = times;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Anything that can stop a scenario.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A scenario check did not hold
    #[error("{0}")]
    Check(String),
}

/// Fails the scenario with `msg` unless `cond` holds.
pub fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<(), SimError> {
    if cond {
        Ok(())
    } else {
        Err(SimError::Check(msg()))
    }
}

/// The units every world registers.
pub fn registry() -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    registry
        .register_entry(TxValues::new("BTC", BTC))
        .register_entry(ShapeShiftPairs::new())
        .register_group(tx_subgraph_search(BTC));
    registry
}

/// The SimWorld - seeded context, in-memory store and runtime.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock, key RNG)
    pub context: Arc<SimContext>,

    /// Workload generator and reference model
    pub oracle: Oracle,

    runtime: Runtime<MemoryStore, SimContext>,

    passes: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let workload_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let context = SimContext::shared(context_seed);
        let store = Arc::new(MemoryStore::new(context.clone()));
        let runtime_config = RuntimeConfig::default().with_workers(config.workers);
        let runtime = Runtime::new(store, context.clone(), registry(), runtime_config);

        Self {
            config,
            context,
            oracle: Oracle::new(workload_seed),
            runtime,
            passes: 0,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        self.runtime.store()
    }

    pub fn runtime(&self) -> &Runtime<MemoryStore, SimContext> {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime<MemoryStore, SimContext> {
        &mut self.runtime
    }

    /// Processing passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    // ---- Inserts ----

    /// Loads transaction records through the text loader, tagged `BTC` + `tx`.
    pub fn insert_transactions(&self, transactions: &[TxRecord]) -> Result<Vec<Key>, SimError> {
        let tags: TagSet = ["BTC", "tx"].into_iter().collect();
        let payloads = transactions
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;
        let text = loader::format_entries(payloads.iter().map(|p| (&tags, p.as_slice())));
        Ok(loader::load_str(self.store().as_ref(), &text)?)
    }

    /// Inserts one entry under a random key.
    pub fn insert_raw(&self, tags: &[&str], payload: &str) -> Result<Key, SimError> {
        let tags: TagSet = tags.iter().copied().collect();
        Ok(self.store().create(tags, payload.as_bytes().to_vec(), Key::SENTINEL)?)
    }

    /// Inserts `(day start, cents)` exchange rates.
    pub fn insert_rates(&self, rates: &[(i64, u64)]) -> Result<(), SimError> {
        for &(day, cents) in rates {
            let tags: TagSet = ["exchange_rate"].into_iter().collect();
            self.store().create(tags, cents.to_string().into_bytes(), rate_key(BTC, day))?;
        }
        Ok(())
    }

    pub fn insert_pairs(&self, pairs: &[PairSpec]) -> Result<Vec<Key>, SimError> {
        let mut keys = Vec::with_capacity(pairs.len());
        for spec in pairs {
            let request = &spec.request;
            keys.push(self.store().create(request.tags(), request.value().into_bytes(), Key::SENTINEL)?);
        }
        Ok(keys)
    }

    /// Inserts the exchange record that satisfies `spec`.
    pub fn insert_shapeshift(&self, spec: &PairSpec) -> Result<Key, SimError> {
        let tags: TagSet = ["shapeshift"].into_iter().collect();
        let value = format!("{}->{}", spec.request.from, spec.request.to);
        Ok(self.store().create(tags, value.into_bytes(), spec.match_key())?)
    }

    /// Inserts the graph's edge entries and seeds its source at distance 0.
    pub fn insert_graph(&self, graph: &GraphSpec) -> Result<(), SimError> {
        let domain = ChainInfo::pack(BTC, TX_EDGE_KIND, 0);
        for &(a, b) in &graph.edges {
            self.store().create(TagSet::new(), Vec::new(), Key::new(domain, a, b))?;
        }
        let seed = tx_subgraph_program(BTC).seed_key(graph.source);
        self.store().create(TagSet::new(), b"0".to_vec(), seed)?;
        Ok(())
    }

    /// Inserts every part of `workload`, each part in shuffled order.
    pub fn insert_workload(&mut self, workload: &Workload) -> Result<(), SimError> {
        let mut transactions = workload.transactions.clone();
        self.oracle.shuffle(&mut transactions);
        self.insert_transactions(&transactions)?;

        let mut rates: Vec<(i64, u64)> = workload.rates.iter().map(|(d, r)| (*d, *r)).collect();
        self.oracle.shuffle(&mut rates);
        self.insert_rates(&rates)?;

        self.insert_pairs(&workload.pairs)?;
        let mut matches = workload.pairs.clone();
        self.oracle.shuffle(&mut matches);
        for spec in &matches {
            self.insert_shapeshift(spec)?;
        }

        self.insert_graph(&workload.graph)
    }

    // ---- Processing ----

    /// Runs dispatch to a fixpoint on the current thread.
    pub fn process(&mut self) -> Result<ProcessReport, SimError> {
        self.tick();
        Ok(self.runtime.process()?)
    }

    /// Runs dispatch to a fixpoint with concurrent workers.
    pub async fn process_parallel(&mut self) -> Result<ProcessReport, SimError> {
        self.tick();
        Ok(self.runtime.process_parallel().await?)
    }

    fn tick(&mut self) {
        self.context.advance_time(PASS_DURATION);
        self.passes += 1;
        debug!("pass {} at t={}ns", self.passes, self.context.time_ns());
    }

    // ---- Inspection ----

    pub fn audit(&self) -> Result<StoreAudit, SimError> {
        Ok(StoreAudit::run(self.store().as_ref(), &self.runtime.registry().configs())?)
    }

    /// Persisted BFS distance of `vertex`.
    pub fn distance(&self, vertex: i64) -> Result<Option<u64>, SimError> {
        Ok(tx_subgraph_program(BTC).read_distance(self.store().as_ref(), vertex)?)
    }

    /// JSON snapshot of every entry.
    pub fn snapshot(&self) -> Result<String, SimError> {
        Ok(loader::export_json(self.store().as_ref())?)
    }

    /// Loads a snapshot taken from another world.
    pub fn restore(&self, snapshot: &str) -> Result<usize, SimError> {
        Ok(loader::import_json(self.store().as_ref(), snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::USD_OUT_TAG;

    #[test]
    fn test_sim_world_creation() {
        let world = SimWorld::new(SimConfig::default());
        assert_eq!(world.runtime().registry().len(), 3);
        assert!(world.store().is_empty().unwrap());
        assert_eq!(world.passes(), 0);
    }

    #[test]
    fn test_sim_world_process_advances_time() {
        let mut world = SimWorld::new(SimConfig::default());
        world.process().unwrap();
        world.process().unwrap();
        assert_eq!(world.passes(), 2);
        assert_eq!(world.context.time_ns(), 2 * PASS_DURATION.as_nanos() as u64);
    }

    #[test]
    fn test_sim_world_determinism() {
        let config = SimConfig::default().with_seed(7).with_records(5);

        let mut world1 = SimWorld::new(config.clone());
        let mut world2 = SimWorld::new(config);
        let w1 = world1.oracle.generate_workload(5, 10, 3);
        let w2 = world2.oracle.generate_workload(5, 10, 3);
        assert_eq!(w1, w2);

        world1.insert_workload(&w1).unwrap();
        world2.insert_workload(&w2).unwrap();
        assert_eq!(world1.snapshot().unwrap(), world2.snapshot().unwrap());
    }

    #[test]
    fn test_transactions_round_trip_through_loader() {
        let mut world = SimWorld::new(SimConfig::default());
        let txs = world.oracle.generate_transactions(3);
        let keys = world.insert_transactions(&txs).unwrap();
        assert_eq!(keys.len(), 3);

        let stored = world.store().get(&keys[0]).unwrap().unwrap();
        assert_eq!(TxRecord::parse(&stored).unwrap(), txs[0]);
    }

    #[test]
    fn test_full_workload_settles() {
        let mut world = SimWorld::new(SimConfig::default().with_records(10).with_graph(20, 5));
        let workload = world.oracle.generate_workload(10, 20, 5);
        world.insert_workload(&workload).unwrap();

        let report = world.process().unwrap();
        assert!(report.quiescent);
        assert_eq!(report.group_reports.len(), 1);

        let audit = world.audit().unwrap();
        assert!(audit.is_clean());
        assert!(audit.waiting.is_empty());
        assert_eq!(audit.done_count("BTC_tx_vals"), 10);
        assert_eq!(audit.done_count("findShapeShiftPairs"), 10);
        assert!(!world.store().query_by_tags(&[USD_OUT_TAG]).unwrap().is_empty());
    }
}
