//! Pando Core - Reactive Tag-Driven Dispatch over a Keyed Entry Store
//!
//! This library solves two problems of computing over a store that fills
//! incrementally and out of order:
//! 1. **Missing Dependency Problem**: units park on absent keys and are woken
//!    by the store when the key appears (check-then-subscribe)
//! 2. **Graph Convergence Problem**: vertex-group GAS supersteps with
//!    double-buffered messages and ACTIVE / INACTIVE liveness
//!
//! Completion is recorded as tags (`<unit>:done`, `<unit>:fail`), so repeated
//! dispatch is always safe.

pub mod access;
pub mod bfs;
pub mod commit;
pub mod gas;
pub mod graph;
pub mod loader;
pub mod memory_store;
pub mod metrics;
pub mod predicate;
pub mod runtime;
pub mod sled_store;
pub mod subscription;
pub mod unit;
pub mod validation;

// Re-export key types for convenience
pub use access::EntryAccess;
pub use bfs::{BfsConfig, BreadthFirstDistance, INFINITE_DISTANCE};
pub use commit::{CommitBatch, CommitSummary};
pub use gas::{Applied, GasError, GasProgram, GasReport, GasUnit, GroupState, GroupView, MessageBuffers, SuperstepEngine};
pub use graph::{Graph, GraphIndex, VertexId};
pub use loader::LoadError;
pub use memory_store::MemoryStore;
pub use metrics::{DispatchOutcome, DispatchStats};
pub use predicate::{eligible, tag_param, TagPredicate};
pub use runtime::{dispatch, ProcessReport, Runtime, RuntimeConfig, RuntimeError};
pub use sled_store::SledStore;
pub use subscription::{FanOutJoin, JoinPolicy, JoinStatus, SubscriptionTable};
pub use unit::{Completion, EntryUnit, GroupUnit, UnitConfig, UnitError, UnitRegistry, UnitVariant};
pub use validation::StoreAudit;
