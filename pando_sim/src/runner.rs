//! Scenario runner - executes dispatch scenarios against a seeded world.

use crate::oracle::{expected_usd, reference_distances};
use crate::scenarios::ScenarioId;
use crate::units::{MATCH_TAG, TX_SUBGRAPH_SEARCH, USD_OUT_TAG};
use crate::world::{ensure, SimConfig, SimError, SimWorld};

use pando_core::{DispatchStats, StoreAudit, INFINITE_DISTANCE};
use pando_env::EntryStore;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

const TX_VALS: &str = "BTC_tx_vals";
const PAIRS: &str = "findShapeShiftPairs";

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all checks
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    /// Entries in the store at the end
    pub entries: usize,

    /// Processing passes run
    pub passes: u64,

    /// Dispatch counters of the scenario's main world
    pub dispatch: DispatchStats,

    /// Entries still parked at the end
    pub waiting: usize,

    /// Entries holding both done and fail for a unit
    pub conflicts: usize,
}

impl ScenarioMetrics {
    fn collect(world: &SimWorld, audit: &StoreAudit) -> Self {
        Self {
            entries: audit.entries,
            passes: world.passes(),
            dispatch: world.runtime().stats().clone(),
            waiting: audit.waiting.len(),
            conflicts: audit.conflicts.len(),
        }
    }
}

/// Runs dispatch scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            config: SimConfig::default().with_seed(seed),
        }
    }

    /// Sets the number of records per workload.
    pub fn with_records(mut self, records: usize) -> Self {
        self.config = self.config.with_records(records);
        self
    }

    /// Sets the graph size.
    pub fn with_graph(mut self, vertices: usize, extra_edges: usize) -> Self {
        self.config = self.config.with_graph(vertices, extra_edges);
        self
    }

    /// Sets how often settled entries are re-dispatched.
    pub fn with_duplicate_dispatch(mut self, times: usize) -> Self {
        self.config = self.config.with_duplicate_dispatch(times);
        self
    }

    /// Sets the worker count of the parallel scenario.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config = self.config.with_workers(workers);
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);

        let outcome = match scenario {
            ScenarioId::OutOfOrderJoin => self.run_out_of_order_join(),
            ScenarioId::FanOutJoin => self.run_fan_out_join(),
            ScenarioId::MalformedInput => self.run_malformed_input(),
            ScenarioId::BfsConvergence => self.run_bfs_convergence(),
            ScenarioId::ReplayIdempotence => self.run_replay_idempotence(),
            ScenarioId::ParallelDispatch => self.run_parallel_dispatch(),
        };

        match outcome {
            Ok(metrics) => ScenarioResult {
                scenario,
                seed: self.config.seed,
                passed: true,
                failure_reason: None,
                metrics,
            },
            Err(e) => ScenarioResult {
                scenario,
                seed: self.config.seed,
                passed: false,
                failure_reason: Some(e.to_string()),
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    fn world(&self) -> SimWorld {
        SimWorld::new(self.config.clone())
    }

    /// SIM-001: every transaction parks on its rate, then rates arrive one
    /// at a time in shuffled order.
    fn run_out_of_order_join(&self) -> Result<ScenarioMetrics, SimError> {
        info!("SIM-001: OutOfOrderJoin - joins on late rates");

        let mut world = self.world();
        let txs = world.oracle.generate_transactions(self.config.records);
        let rates = world.oracle.generate_rates();

        world.insert_transactions(&txs)?;
        world.process()?;

        let audit = world.audit()?;
        ensure(audit.waiting.len() == txs.len(), || {
            format!("{} of {} transactions parked", audit.waiting.len(), txs.len())
        })?;
        ensure(audit.done_count(TX_VALS) == 0, || "a transaction finished without its rate".into())?;
        ensure(world.store().query_by_tags(&[USD_OUT_TAG])?.is_empty(), || {
            "USD outputs exist before any rate".into()
        })?;

        let mut arrivals: Vec<(i64, u64)> = rates.iter().map(|(d, r)| (*d, *r)).collect();
        world.oracle.shuffle(&mut arrivals);
        for rate in arrivals {
            world.insert_rates(&[rate])?;
            let report = world.process()?;
            debug!("  rate for day {} woke {} dispatches", rate.0, report.dispatched);
        }

        let expected = expected_usd(&txs, &rates);
        check_usd_outputs(&world, &expected)?;

        let audit = world.audit()?;
        ensure(audit.waiting.is_empty(), || format!("{} entries still parked", audit.waiting.len()))?;
        ensure(audit.done_count(TX_VALS) == txs.len(), || {
            format!("{} of {} transactions done", audit.done_count(TX_VALS), txs.len())
        })?;
        ensure(audit.is_clean(), || audit.summary())?;

        info!("✓ OutOfOrderJoin complete: {} USD outputs", expected.len());
        Ok(ScenarioMetrics::collect(&world, &audit))
    }

    /// SIM-002: pairs park on four candidates; half are satisfied, then the
    /// rest.
    fn run_fan_out_join(&self) -> Result<ScenarioMetrics, SimError> {
        info!("SIM-002: FanOutJoin - any-of joins over four orderings");

        let mut world = self.world();
        let mut pairs = world.oracle.generate_pairs(self.config.records);
        let keys = world.insert_pairs(&pairs)?;
        world.process()?;

        for key in &keys {
            let waiting = world.store().waiting_on(key)?.len();
            ensure(waiting == 4, || format!("pair {} waits on {} keys, not 4", key, waiting))?;
        }

        world.oracle.shuffle(&mut pairs);
        let half = pairs.len() / 2;
        for spec in &pairs[..half] {
            world.insert_shapeshift(spec)?;
        }
        world.process()?;
        let audit = world.audit()?;
        ensure(audit.done_count(PAIRS) == half, || {
            format!("{} pairs done after {} matches", audit.done_count(PAIRS), half)
        })?;
        ensure(audit.waiting.len() == pairs.len() - half, || {
            format!("{} pairs still waiting, expected {}", audit.waiting.len(), pairs.len() - half)
        })?;

        for spec in &pairs[half..] {
            world.insert_shapeshift(spec)?;
        }
        world.process()?;

        let matched = world.store().query_by_tags(&["pair", MATCH_TAG])?;
        ensure(matched.len() == pairs.len(), || {
            format!("{} of {} pairs matched", matched.len(), pairs.len())
        })?;
        let audit = world.audit()?;
        ensure(audit.waiting.is_empty(), || format!("{} pairs still waiting", audit.waiting.len()))?;
        ensure(audit.is_clean(), || audit.summary())?;

        info!("✓ FanOutJoin complete: {} pairs matched", matched.len());
        Ok(ScenarioMetrics::collect(&world, &audit))
    }

    /// SIM-003: corrupt payloads fail exactly once; valid ones complete.
    fn run_malformed_input(&self) -> Result<ScenarioMetrics, SimError> {
        info!("SIM-003: MalformedInput - corrupt payloads among valid records");

        const BAD_PAYLOADS: [&str; 5] = [
            "not json at all",
            r#"{"txid": 17, "time": 1500076800, "vout": []}"#,
            r#"{"txid": "zz-not-hex", "time": 1500076800, "vout": [{"value": 1, "n": 0}]}"#,
            r#"{"txid": "abc", "time": 1500076800, "vout": []}"#,
            r#"{"txid": "abc", "time": 1500076800}"#,
        ];

        let mut world = self.world();
        let txs = world.oracle.generate_transactions(self.config.records);
        let rates = world.oracle.generate_rates();
        let rate_list: Vec<(i64, u64)> = rates.iter().map(|(d, r)| (*d, *r)).collect();
        world.insert_rates(&rate_list)?;
        world.insert_transactions(&txs)?;
        for payload in BAD_PAYLOADS {
            world.insert_raw(&["BTC", "tx"], payload)?;
        }

        world.process()?;
        let audit = world.audit()?;
        ensure(audit.failed_count(TX_VALS) == BAD_PAYLOADS.len(), || {
            format!("{} failures, expected {}", audit.failed_count(TX_VALS), BAD_PAYLOADS.len())
        })?;
        ensure(audit.done_count(TX_VALS) == txs.len(), || {
            format!("{} of {} valid transactions done", audit.done_count(TX_VALS), txs.len())
        })?;
        ensure(audit.is_clean(), || audit.summary())?;
        check_usd_outputs(&world, &expected_usd(&txs, &rates))?;

        // Failed entries are terminal
        let again = world.process()?;
        ensure(again.dispatched == 0, || format!("{} dispatches after settling", again.dispatched))?;

        info!("✓ MalformedInput complete: {} rejected", BAD_PAYLOADS.len());
        Ok(ScenarioMetrics::collect(&world, &audit))
    }

    /// SIM-004: GAS BFS against the reference BFS.
    fn run_bfs_convergence(&self) -> Result<ScenarioMetrics, SimError> {
        info!("SIM-004: BfsConvergence - GAS supersteps vs reference");

        let mut world = self.world();
        let graph = world
            .oracle
            .generate_graph(self.config.graph_vertices, self.config.extra_edges);
        world.insert_graph(&graph)?;

        let report = world.process()?;
        ensure(report.group_reports.len() == 1, || {
            format!("{} group runs, expected 1", report.group_reports.len())
        })?;
        let gas = &report.group_reports[0];
        ensure(gas.unit == TX_SUBGRAPH_SEARCH && gas.converged, || {
            format!("{} did not converge in {} supersteps", gas.unit, gas.supersteps)
        })?;

        let reference = reference_distances(&graph);
        let mut reached = 0;
        for (vertex, expected) in &reference {
            let actual = world.distance(*vertex)?;
            ensure(actual == Some(*expected), || {
                format!("vertex {}: distance {:?}, reference {}", vertex, actual, expected)
            })?;
            if *expected != INFINITE_DISTANCE {
                reached += 1;
            }
        }

        // Converged groups are not eligible again
        let rerun = world.process()?;
        ensure(rerun.group_reports.is_empty(), || "BFS ran again after converging".into())?;

        let audit = world.audit()?;
        info!(
            "✓ BfsConvergence complete: {}/{} vertices reached in {} supersteps",
            reached,
            reference.len(),
            gas.supersteps
        );
        Ok(ScenarioMetrics::collect(&world, &audit))
    }

    /// SIM-005: settled stores are fixpoints of dispatch.
    fn run_replay_idempotence(&self) -> Result<ScenarioMetrics, SimError> {
        info!("SIM-005: ReplayIdempotence - duplicate dispatch and restore");

        let mut world = self.world();
        let workload = world.oracle.generate_workload(
            self.config.records,
            self.config.graph_vertices,
            self.config.extra_edges,
        );
        world.insert_workload(&workload)?;
        world.process()?;
        let settled = world.snapshot()?;

        let again = world.process()?;
        ensure(again.dispatched == 0 && again.group_reports.is_empty(), || {
            format!(
                "{} dispatches and {} group runs on a settled store",
                again.dispatched,
                again.group_reports.len()
            )
        })?;

        let keys = world.store().keys()?;
        for _ in 0..self.config.duplicate_dispatch {
            for key in &keys {
                for unit in [TX_VALS, PAIRS] {
                    let outcome = world.runtime_mut().dispatch_entry(unit, key)?;
                    ensure(!outcome.ran(), || format!("{} ran again on {}: {:?}", unit, key, outcome))?;
                }
            }
        }
        ensure(world.snapshot()? == settled, || "re-dispatch changed the store".into())?;

        // A fresh world restored from the snapshot has nothing to do
        let mut restored = self.world();
        restored.restore(&settled)?;
        let report = restored.process()?;
        ensure(report.dispatched == 0 && report.group_reports.is_empty(), || {
            format!("restored world dispatched {} units", report.dispatched)
        })?;
        ensure(restored.snapshot()? == settled, || "restored world diverged".into())?;

        let audit = world.audit()?;
        ensure(audit.is_clean(), || audit.summary())?;
        info!("✓ ReplayIdempotence complete: {} keys re-offered", keys.len());
        Ok(ScenarioMetrics::collect(&world, &audit))
    }

    /// SIM-006: parallel and sequential dispatch from the same seed.
    fn run_parallel_dispatch(&self) -> Result<ScenarioMetrics, SimError> {
        info!(
            "SIM-006: ParallelDispatch - {} workers vs sequential",
            self.config.workers
        );

        let mut sequential = self.world();
        let mut parallel = self.world();
        for world in [&mut sequential, &mut parallel] {
            let workload = world.oracle.generate_workload(
                self.config.records,
                self.config.graph_vertices,
                self.config.extra_edges,
            );
            world.insert_workload(&workload)?;
        }

        let seq_report = sequential.process()?;
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.workers)
            .enable_all()
            .build()?;
        let par_report = rt.block_on(parallel.process_parallel())?;

        ensure(seq_report.quiescent && par_report.quiescent, || "dispatch did not settle".into())?;
        ensure(sequential.snapshot()? == parallel.snapshot()?, || {
            "parallel end state differs from sequential".into()
        })?;

        let seq_audit = sequential.audit()?;
        let par_audit = parallel.audit()?;
        ensure(seq_audit == par_audit, || {
            format!("audits differ: {} vs {}", seq_audit.summary(), par_audit.summary())
        })?;
        ensure(par_audit.is_clean(), || par_audit.summary())?;

        info!(
            "✓ ParallelDispatch complete: {} sequential vs {} parallel executions",
            seq_report.dispatched, par_report.dispatched
        );
        Ok(ScenarioMetrics::collect(&parallel, &par_audit))
    }
}

/// Every expected USD output exists with its value, and no other does.
fn check_usd_outputs(world: &SimWorld, expected: &BTreeMap<pando_env::Key, u64>) -> Result<(), SimError> {
    let stored = world.store().query_by_tags(&[USD_OUT_TAG])?;
    ensure(stored.len() == expected.len(), || {
        format!("{} USD outputs, expected {}", stored.len(), expected.len())
    })?;
    for (key, value) in expected {
        let actual = world.store().get(key)?;
        ensure(actual.as_deref() == Some(value.to_string().as_bytes()), || {
            format!("USD output {} holds {:?}, expected {}", key, actual, value)
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42).with_records(12).with_graph(30, 10)
    }

    #[test]
    fn test_out_of_order_join_scenario() {
        let result = runner().run(ScenarioId::OutOfOrderJoin);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.dispatch.deferred >= 12);
        assert_eq!(result.metrics.waiting, 0);
    }

    #[test]
    fn test_fan_out_join_scenario() {
        let result = runner().run(ScenarioId::FanOutJoin);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.dispatch.done, 12);
    }

    #[test]
    fn test_malformed_input_scenario() {
        let result = runner().run(ScenarioId::MalformedInput);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.dispatch.failed, 5);
        assert_eq!(result.metrics.conflicts, 0);
    }

    #[test]
    fn test_bfs_convergence_scenario() {
        let result = runner().run(ScenarioId::BfsConvergence);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.dispatch.group_runs, 1);
        assert!(result.metrics.dispatch.supersteps > 0);
    }

    #[test]
    fn test_replay_idempotence_scenario() {
        let result = runner().with_duplicate_dispatch(3).run(ScenarioId::ReplayIdempotence);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_parallel_dispatch_scenario() {
        let result = runner().with_workers(3).run(ScenarioId::ParallelDispatch);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_scenarios_pass_across_seeds() {
        for seed in [1, 7, 1234] {
            let runner = ScenarioRunner::new(seed).with_records(8).with_graph(25, 8);
            for scenario in ScenarioId::all() {
                let result = runner.run(scenario);
                assert!(result.passed, "{} seed={}: {:?}", scenario, seed, result.failure_reason);
            }
        }
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let a = runner().run(ScenarioId::OutOfOrderJoin);
        let b = runner().run(ScenarioId::OutOfOrderJoin);
        assert_eq!(a.metrics, b.metrics);
    }
}
