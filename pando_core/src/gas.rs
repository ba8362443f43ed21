//! The "SUPERSTEP" Engine - Gather / Apply / Scatter over vertex groups.
//!
//! Every participating vertex of a graph is a group with its own value,
//! iteration counter and liveness state. One superstep:
//!
//! 1. **Gather**: fold this iteration's inbox with `gather`, seeded by
//!    `gather_init`
//! 2. **Apply**: `apply(current, gathered)` produces the next value
//! 3. **Scatter**: changed groups send `scatter(value)` along every
//!    out-edge for the next iteration
//!
//! Iteration 0 is special: groups take their value from `init` and scatter
//! without gathering. Messages sent during iteration `i` are only readable
//! once the barrier has advanced the buffers to `i + 1`.

use crate::graph::{Adjacency, Graph, VertexId};
use crate::unit::{GroupUnit, UnitConfig, UnitError};
use pando_env::{ChainInfo, EntryStore, Key, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by the superstep engine.
#[derive(Debug, Error)]
pub enum GasError {
    /// A participant is not a vertex of the graph
    #[error("Unknown vertex {0}")]
    UnknownVertex(VertexId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A program callback (init / save_output) failed
    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),
}

/// Liveness of a vertex group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupState {
    Active,
    Inactive,
}

/// Result of an apply step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied<T> {
    /// Liveness follows whether the value changed
    Updated(T),

    /// The group goes inactive regardless of change
    Halted(T),
}

impl<T> Applied<T> {
    pub fn into_value(self) -> T {
        match self {
            Applied::Updated(v) | Applied::Halted(v) => v,
        }
    }
}

/// Read-only view of one vertex group handed to program callbacks.
#[derive(Debug, Clone, Copy)]
pub struct GroupView<'a> {
    pub domain: ChainInfo,
    pub vertex: VertexId,
    pub adjacency: &'a Adjacency,
    pub iteration: u64,
    pub state: GroupState,
}

impl GroupView<'_> {
    /// The group's own key, `(domain, vertex, 0)`.
    pub fn key(&self) -> Key {
        Key::new(self.domain, self.vertex, 0)
    }

    pub fn out_degree(&self) -> usize {
        self.adjacency.out_degree()
    }
}

/// A vertex-centric GAS computation.
///
/// `gather` must be associative, commutative and idempotent: inbox order
/// and duplicate delivery may not change the gathered value.
pub trait GasProgram: Send + Sync + 'static {
    /// Per-vertex value
    type Value: Clone + PartialEq + Send + Debug;

    /// Payload sent along edges
    type Message: Clone + Send + Debug;

    fn config(&self) -> &UnitConfig;

    /// Whether `graph` has what a run needs to start, such as a seeded
    /// source. Nothing is written for a graph that is not ready.
    fn ready(&self, _graph: &Graph, _store: &dyn EntryStore) -> Result<bool, StoreError> {
        Ok(true)
    }

    /// Whether the group takes part in this run.
    fn eligible(&self, group: &GroupView<'_>, store: &dyn EntryStore) -> Result<bool, StoreError>;

    fn gather_init(&self) -> Self::Message;

    fn gather(&self, a: Self::Message, b: Self::Message) -> Self::Message;

    fn apply(&self, current: &Self::Value, gathered: Self::Message) -> Applied<Self::Value>;

    fn scatter(&self, value: &Self::Value) -> Self::Message;

    /// Reads the externally seeded starting value and persists it.
    fn init(&self, group: &GroupView<'_>, store: &dyn EntryStore) -> Result<Self::Value, UnitError>;

    /// Persists the group's value.
    fn save_output(
        &self,
        group: &GroupView<'_>,
        store: &dyn EntryStore,
        value: &Self::Value,
    ) -> Result<(), UnitError>;

    fn is_close(&self, a: &Self::Value, b: &Self::Value) -> bool {
        a == b
    }
}

/// A message in flight between two groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<M> {
    pub iteration: u64,
    pub source: VertexId,
    pub destination: VertexId,
    pub payload: M,
}

/// Double-buffered per-destination inboxes.
///
/// `send` only ever writes the next iteration's buffer and `inbox` only
/// ever reads the current one; `advance` swaps them at the barrier.
#[derive(Debug)]
pub struct MessageBuffers<M> {
    iteration: u64,
    current: HashMap<VertexId, Vec<Message<M>>>,
    next: HashMap<VertexId, Vec<Message<M>>>,
}

impl<M> Default for MessageBuffers<M> {
    fn default() -> Self {
        Self {
            iteration: 0,
            current: HashMap::new(),
            next: HashMap::new(),
        }
    }
}

impl<M> MessageBuffers<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iteration whose inbox is currently readable.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Queues a payload for delivery at the next iteration.
    pub fn send(&mut self, source: VertexId, destination: VertexId, payload: M) {
        self.next.entry(destination).or_default().push(Message {
            iteration: self.iteration + 1,
            source,
            destination,
            payload,
        });
    }

    pub fn inbox(&self, vertex: VertexId) -> &[Message<M>] {
        self.current.get(&vertex).map_or(&[], Vec::as_slice)
    }

    /// Messages queued for the next iteration.
    pub fn outbound(&self) -> usize {
        self.next.values().map(Vec::len).sum()
    }

    /// Messages readable in the current iteration.
    pub fn inbound(&self) -> usize {
        self.current.values().map(Vec::len).sum()
    }

    /// Barrier: the next iteration's messages become readable.
    pub fn advance(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
        self.next.clear();
        self.iteration += 1;
    }
}

/// Engine-side state of one vertex group.
#[derive(Debug, Clone)]
pub struct VertexGroup<T> {
    pub vertex: VertexId,
    pub value: T,
    pub state: GroupState,
    pub iteration: u64,
    dirty: bool,
}

/// Summary of one group computation over one graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GasReport {
    pub unit: String,
    pub domain: ChainInfo,
    pub participants: usize,
    pub supersteps: u64,
    pub converged: bool,
    pub messages: u64,
    pub evaluations: u64,
}

/// Runs one [`GasProgram`] over the participating groups of one graph.
pub struct SuperstepEngine<'a, P: GasProgram> {
    program: &'a P,
    graph: &'a Graph,
    store: &'a dyn EntryStore,
    groups: BTreeMap<VertexId, Option<VertexGroup<P::Value>>>,
    buffers: MessageBuffers<P::Message>,
    supersteps: u64,
    messages: u64,
    evaluations: u64,
}

impl<'a, P: GasProgram> SuperstepEngine<'a, P> {
    pub fn new(
        program: &'a P,
        graph: &'a Graph,
        store: &'a dyn EntryStore,
        participants: &[VertexId],
    ) -> Result<Self, GasError> {
        let mut groups = BTreeMap::new();
        for &v in participants {
            if !graph.contains(v) {
                return Err(GasError::UnknownVertex(v));
            }
            // Created on first addressing, at iteration 0
            groups.insert(v, None);
        }
        Ok(Self {
            program,
            graph,
            store,
            groups,
            buffers: MessageBuffers::new(),
            supersteps: 0,
            messages: 0,
            evaluations: 0,
        })
    }

    /// Index of the next superstep to run.
    pub fn iteration(&self) -> u64 {
        self.buffers.iteration()
    }

    pub fn value(&self, vertex: VertexId) -> Option<&P::Value> {
        self.groups
            .get(&vertex)
            .and_then(Option::as_ref)
            .map(|g| &g.value)
    }

    pub fn state(&self, vertex: VertexId) -> Option<GroupState> {
        self.groups
            .get(&vertex)
            .and_then(Option::as_ref)
            .map(|g| g.state)
    }

    pub fn active_groups(&self) -> usize {
        self.groups
            .values()
            .flatten()
            .filter(|g| g.state == GroupState::Active)
            .count()
    }

    fn view(&self, vertex: VertexId, iteration: u64, state: GroupState) -> Result<GroupView<'a>, GasError> {
        let adjacency = self
            .graph
            .adjacency(vertex)
            .ok_or(GasError::UnknownVertex(vertex))?;
        Ok(GroupView {
            domain: self.graph.domain,
            vertex,
            adjacency,
            iteration,
            state,
        })
    }

    fn scatter(&mut self, view: &GroupView<'_>, value: &P::Value) {
        let payload = self.program.scatter(value);
        for edge in &view.adjacency.out_edges {
            if self.groups.contains_key(&edge.peer) {
                self.buffers.send(view.vertex, edge.peer, payload.clone());
                self.messages += 1;
            }
        }
    }

    /// Runs one superstep and crosses the barrier.
    ///
    /// Returns true if any group is still active afterwards.
    pub fn step(&mut self) -> Result<bool, GasError> {
        let iteration = self.buffers.iteration();
        let vertices: Vec<VertexId> = self.groups.keys().copied().collect();

        for v in vertices {
            if iteration == 0 {
                let view = self.view(v, 0, GroupState::Active)?;
                let value = self.program.init(&view, self.store)?;
                self.scatter(&view, &value);
                self.groups.insert(
                    v,
                    Some(VertexGroup {
                        vertex: v,
                        value,
                        state: GroupState::Active,
                        iteration: 0,
                        dirty: false,
                    }),
                );
                self.evaluations += 1;
                continue;
            }

            let Some(Some(group)) = self.groups.get(&v) else {
                continue;
            };
            let inbox = self.buffers.inbox(v);
            if group.state == GroupState::Inactive && inbox.is_empty() {
                continue;
            }

            let gathered = inbox
                .iter()
                .fold(self.program.gather_init(), |acc, m| {
                    self.program.gather(acc, m.payload.clone())
                });
            let (next, halted) = match self.program.apply(&group.value, gathered) {
                Applied::Updated(next) => (next, false),
                Applied::Halted(next) => (next, true),
            };
            let changed = !self.program.is_close(&group.value, &next);
            let was_active = group.state == GroupState::Active;
            let dirty = group.dirty || changed;

            let view = self.view(v, iteration, GroupState::Active)?;
            let (state, dirty) = if changed && !halted {
                self.scatter(&view, &next);
                (GroupState::Active, dirty)
            } else {
                // May be the last evaluation of this group
                if dirty || was_active {
                    let view = GroupView {
                        state: GroupState::Inactive,
                        ..view
                    };
                    self.program.save_output(&view, self.store, &next)?;
                }
                (GroupState::Inactive, false)
            };

            self.groups.insert(
                v,
                Some(VertexGroup {
                    vertex: v,
                    value: next,
                    state,
                    iteration,
                    dirty,
                }),
            );
            self.evaluations += 1;
        }

        self.buffers.advance();
        self.supersteps += 1;
        let active = self.active_groups();
        debug!(
            "Superstep {} done: {} active groups, {} messages pending",
            iteration,
            active,
            self.buffers.inbound()
        );
        Ok(active > 0)
    }

    /// Steps until no group is active and no message is pending, or until
    /// `max_supersteps` have run. Dirty values are persisted before return.
    pub fn run(&mut self, max_supersteps: u64) -> Result<bool, GasError> {
        let mut converged = false;
        while self.supersteps < max_supersteps {
            let active = self.step()?;
            if !active && self.buffers.inbound() == 0 {
                converged = true;
                break;
            }
        }
        self.flush()?;
        Ok(converged)
    }

    /// Persists every group whose value changed since it was last saved.
    pub fn flush(&mut self) -> Result<(), GasError> {
        let iteration = self.buffers.iteration();
        let dirty: Vec<(VertexId, P::Value, GroupState)> = self
            .groups
            .values()
            .flatten()
            .filter(|g| g.dirty)
            .map(|g| (g.vertex, g.value.clone(), g.state))
            .collect();
        for (v, value, state) in dirty {
            let view = self.view(v, iteration, state)?;
            self.program.save_output(&view, self.store, &value)?;
            if let Some(Some(group)) = self.groups.get_mut(&v) {
                group.dirty = false;
            }
        }
        Ok(())
    }

    pub fn supersteps(&self) -> u64 {
        self.supersteps
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }
}

/// Adapts a [`GasProgram`] to the [`GroupUnit`] dispatch surface.
///
/// On convergence the unit's done tag is added to every out-edge entry of
/// every participant, which is what group eligibility checks on later runs.
pub struct GasUnit<P> {
    program: P,
}

impl<P: GasProgram> GasUnit<P> {
    pub fn new(program: P) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &P {
        &self.program
    }

    /// Participants of `graph` for this program, in vertex order.
    ///
    /// Eligible groups plus every group downstream of one, so new values
    /// reach vertices that settled in an earlier run.
    pub fn participants(&self, graph: &Graph, store: &dyn EntryStore) -> Result<Vec<VertexId>, StoreError> {
        let mut selected = BTreeSet::new();
        let mut frontier = Vec::new();
        for (&vertex, adjacency) in &graph.vertices {
            let view = GroupView {
                domain: graph.domain,
                vertex,
                adjacency,
                iteration: 0,
                state: GroupState::Active,
            };
            if self.program.eligible(&view, store)? {
                selected.insert(vertex);
                frontier.push(vertex);
            }
        }
        while let Some(vertex) = frontier.pop() {
            let Some(adjacency) = graph.adjacency(vertex) else {
                continue;
            };
            for edge in &adjacency.out_edges {
                if graph.contains(edge.peer) && selected.insert(edge.peer) {
                    frontier.push(edge.peer);
                }
            }
        }
        Ok(selected.into_iter().collect())
    }
}

impl<P: GasProgram> GroupUnit for GasUnit<P> {
    fn config(&self) -> &UnitConfig {
        self.program.config()
    }

    fn compute(
        &self,
        graph: &Graph,
        store: &dyn EntryStore,
        max_supersteps: u64,
    ) -> Result<Option<GasReport>, GasError> {
        if !self.program.ready(graph, store)? {
            debug!(
                "{} skips graph {}: not ready",
                self.program.config().name(),
                graph.domain
            );
            return Ok(None);
        }
        let participants = self.participants(graph, store)?;
        if participants.is_empty() {
            return Ok(None);
        }

        let unit = self.program.config().name().to_string();
        info!(
            "Running {} over {} groups of graph {}",
            unit,
            participants.len(),
            graph.domain
        );

        let mut engine = SuperstepEngine::new(&self.program, graph, store, &participants)?;
        let converged = engine.run(max_supersteps)?;

        if converged {
            let done = self.program.config().done_tag();
            for v in &participants {
                if let Some(adjacency) = graph.adjacency(*v) {
                    for edge in &adjacency.out_edges {
                        store.add_tag(&edge.entry, done)?;
                    }
                }
            }
        } else {
            warn!(
                "{} hit the superstep limit ({}) on graph {} without converging",
                unit, max_supersteps, graph.domain
            );
        }

        Ok(Some(GasReport {
            unit,
            domain: graph.domain,
            participants: participants.len(),
            supersteps: engine.supersteps(),
            converged,
            messages: engine.messages(),
            evaluations: engine.evaluations(),
        }))
    }
}
