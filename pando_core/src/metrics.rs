//! Pando Dispatch Metrics
//! ======================
//!
//! Counters kept by the runtime across rounds:
//! - **Entry dispatch**: how single-entry invocations ended
//! - **Group phase**: GAS runs, supersteps and failures
//!
//! Counters only ever grow; use [`DispatchStats::merge`] to combine the
//! stats of several runtimes (e.g. one per simulated seed).

use crate::gas::GasReport;
use serde::Serialize;

/// How one dispatch of one unit against one entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchOutcome {
    /// The key no longer exists
    NoEntry,

    /// Predicate rejected the entry; nothing ran
    Ineligible,

    /// Done tag added
    Done,

    /// Parked on a subscription
    Deferred,

    /// Malformed input; fail tag added
    Failed,

    /// Invariant violation or commit failure; effects discarded, fail tag added
    Aborted,

    /// Transient store failure; the entry stays eligible
    Retry,
}

impl DispatchOutcome {
    /// True if the unit actually executed.
    pub fn ran(self) -> bool {
        !matches!(self, DispatchOutcome::NoEntry | DispatchOutcome::Ineligible)
    }
}

/// Aggregate dispatch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Unit executions (every outcome except NoEntry / Ineligible)
    pub runs: u64,
    pub done: u64,
    pub failed: u64,
    pub deferred: u64,
    /// Ineligible or vanished entries
    pub skipped: u64,
    pub retried: u64,
    pub invariant_violations: u64,
    pub rounds: u64,
    pub group_runs: u64,
    pub group_failures: u64,
    pub supersteps: u64,
    pub messages: u64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: DispatchOutcome) {
        if outcome.ran() {
            self.runs += 1;
        }
        match outcome {
            DispatchOutcome::NoEntry | DispatchOutcome::Ineligible => self.skipped += 1,
            DispatchOutcome::Done => self.done += 1,
            DispatchOutcome::Deferred => self.deferred += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Aborted => {
                self.failed += 1;
                self.invariant_violations += 1;
            }
            DispatchOutcome::Retry => self.retried += 1,
        }
    }

    pub fn record_round(&mut self) {
        self.rounds += 1;
    }

    pub fn record_group(&mut self, report: &GasReport) {
        self.group_runs += 1;
        self.supersteps += report.supersteps;
        self.messages += report.messages;
    }

    pub fn record_group_failure(&mut self) {
        self.group_failures += 1;
    }

    pub fn merge(&mut self, other: &DispatchStats) {
        self.runs += other.runs;
        self.done += other.done;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.invariant_violations += other.invariant_violations;
        self.rounds += other.rounds;
        self.group_runs += other.group_runs;
        self.group_failures += other.group_failures;
        self.supersteps += other.supersteps;
        self.messages += other.messages;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pando_env::ChainInfo;

    #[test]
    fn test_record_outcomes() {
        let mut stats = DispatchStats::new();
        for outcome in [
            DispatchOutcome::Done,
            DispatchOutcome::Deferred,
            DispatchOutcome::Ineligible,
            DispatchOutcome::Aborted,
            DispatchOutcome::Retry,
        ] {
            stats.record(outcome);
        }

        assert_eq!(stats.runs, 4);
        assert_eq!(stats.done, 1);
        assert_eq!(stats.deferred, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.invariant_violations, 1);
        assert_eq!(stats.retried, 1);
    }

    #[test]
    fn test_merge_and_group_reports() {
        let report = GasReport {
            unit: "bfs".to_string(),
            domain: ChainInfo::pack(1, 3, 0),
            participants: 4,
            supersteps: 5,
            converged: true,
            messages: 12,
            evaluations: 14,
        };
        let mut a = DispatchStats::new();
        a.record_group(&report);
        let mut b = DispatchStats::new();
        b.record_group(&report);
        b.record_group_failure();

        a.merge(&b);
        assert_eq!(a.group_runs, 2);
        assert_eq!(a.supersteps, 10);
        assert_eq!(a.messages, 24);
        assert_eq!(a.group_failures, 1);
    }
}
