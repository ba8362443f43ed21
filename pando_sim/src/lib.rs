//! Pando Deterministic Simulation Harness
//!
//! This crate runs the Pando dispatch engine against seeded workloads and
//! checks the settled store against an independent reference model.
//!
//! # Core Principle: One Seed, One Run
//!
//! All sources of non-determinism are derived from a single 64-bit seed:
//! - **Keys**: sentinel inserts resolve through a seeded ChaCha8 RNG
//! - **Workload**: records, rates, pairs and graphs come from the [`Oracle`]
//! - **Arrival order**: every insert batch is shuffled by the same RNG
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock + Seeded Key RNG)          │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────────┐          ┌────▼─────────────────┐          │
//! │  │ MemoryStore │◄────────►│ Runtime              │          │
//! │  │ (entries +  │ dispatch │ TxValues, ShapeShift │          │
//! │  │  wakeups)   │          │ Pairs, BFS (GAS)     │          │
//! │  └─────────────┘          └──────────────────────┘          │
//! │       ▲                                                     │
//! │  ┌────┴─────────────────────────────┐                       │
//! │  │            Oracle                 │                       │
//! │  │  (Workload + Reference Results)   │                       │
//! │  └───────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pando_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_records(20).run(ScenarioId::OutOfOrderJoin);
//! assert!(result.passed);
//! ```

mod context;
mod oracle;
mod runner;
pub mod scenarios;
pub mod units;
mod world;

pub use context::SimContext;
pub use oracle::{expected_usd, reference_distances, GraphSpec, Oracle, PairSpec, Workload};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use world::{SimConfig, SimError, SimWorld};
