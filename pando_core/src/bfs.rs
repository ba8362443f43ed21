//! Breadth-first distance as a GAS program.
//!
//! `gather = min`, `apply = min`, `scatter(v) = v + 1` except that the
//! infinite distance stays infinite. Sources are seeded externally with an
//! entry at `(seed_domain, vertex, 0)` whose value is a decimal distance,
//! normally `0`. Results live at `(distance_domain, vertex, 0)`.

use crate::gas::{Applied, GasProgram, GasUnit, GroupView};
use crate::graph::Graph;
use crate::unit::{UnitConfig, UnitError};
use pando_env::{ChainInfo, EntryStore, Key, StoreError, TagSet};
use tracing::trace;

/// Distance of an unreached vertex.
pub const INFINITE_DISTANCE: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BfsConfig {
    /// Graph domains the program runs over
    pub edge_domains: Vec<ChainInfo>,

    /// Domain of the persisted distance entries
    pub distance_domain: ChainInfo,

    /// Domain of the externally seeded start values
    pub seed_domain: ChainInfo,

    /// Tags put on newly created distance entries
    pub result_tags: Vec<String>,

    /// Mark out-edges with the speculative tag on every save
    pub speculative_complete: bool,
}

impl BfsConfig {
    pub fn new(edge_domain: ChainInfo, distance_domain: ChainInfo, seed_domain: ChainInfo) -> Self {
        Self {
            edge_domains: vec![edge_domain],
            distance_domain,
            seed_domain,
            result_tags: Vec::new(),
            speculative_complete: false,
        }
    }

    pub fn with_edge_domain(mut self, domain: ChainInfo) -> Self {
        self.edge_domains.push(domain);
        self
    }

    pub fn with_result_tag(mut self, tag: impl Into<String>) -> Self {
        self.result_tags.push(tag.into());
        self
    }

    pub fn with_speculative_complete(mut self, enabled: bool) -> Self {
        self.speculative_complete = enabled;
        self
    }
}

/// Shortest hop count from any seeded source.
pub struct BreadthFirstDistance {
    config: UnitConfig,
    bfs: BfsConfig,
}

impl BreadthFirstDistance {
    pub fn new(name: impl Into<String>, bfs: BfsConfig) -> Self {
        Self {
            config: UnitConfig::new(name),
            bfs,
        }
    }

    /// Wraps the program for registration as a vertex-group unit.
    pub fn into_unit(self) -> GasUnit<Self> {
        GasUnit::new(self)
    }

    pub fn bfs_config(&self) -> &BfsConfig {
        &self.bfs
    }

    pub fn distance_key(&self, vertex: i64) -> Key {
        Key::new(self.bfs.distance_domain, vertex, 0)
    }

    pub fn seed_key(&self, vertex: i64) -> Key {
        Key::new(self.bfs.seed_domain, vertex, 0)
    }

    /// Reads a persisted distance.
    pub fn read_distance(&self, store: &dyn EntryStore, vertex: i64) -> Result<Option<u64>, UnitError> {
        match store.get(&self.distance_key(vertex))? {
            Some(raw) => parse_distance(&raw).map(Some),
            None => Ok(None),
        }
    }
}

fn parse_distance(raw: &[u8]) -> Result<u64, UnitError> {
    let text = std::str::from_utf8(raw).map_err(|e| UnitError::malformed(format!("distance is not UTF-8: {}", e)))?;
    text.trim()
        .parse()
        .map_err(|e| UnitError::malformed(format!("bad distance {:?}: {}", text, e)))
}

impl GasProgram for BreadthFirstDistance {
    type Value = u64;
    type Message = u64;

    fn config(&self) -> &UnitConfig {
        &self.config
    }

    /// Unseeded graphs wait: a run without a source would settle every
    /// vertex at infinity and close the graph to a later seed.
    fn ready(&self, graph: &Graph, store: &dyn EntryStore) -> Result<bool, StoreError> {
        if !self.bfs.edge_domains.contains(&graph.domain) {
            return Ok(false);
        }
        for &vertex in graph.vertices.keys() {
            if store.get(&self.seed_key(vertex))?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A vertex whose seed is below its persisted distance always runs.
    /// Otherwise sinks run until their result exists and other groups run
    /// while any out-edge lacks the done tag.
    fn eligible(&self, group: &GroupView<'_>, store: &dyn EntryStore) -> Result<bool, StoreError> {
        if !self.bfs.edge_domains.contains(&group.domain) {
            return Ok(false);
        }
        if let Some(raw) = store.get(&self.seed_key(group.vertex))? {
            let persisted = store.get(&self.distance_key(group.vertex))?;
            let lowered = match (parse_distance(&raw), persisted.as_deref().map(parse_distance)) {
                (Ok(seed), Some(Ok(current))) => seed < current,
                // Unreadable values surface as errors from init
                _ => true,
            };
            if lowered {
                return Ok(true);
            }
        }
        if group.out_degree() == 0 {
            return Ok(store.get(&self.distance_key(group.vertex))?.is_none());
        }
        for edge in &group.adjacency.out_edges {
            let done = store
                .entry(&edge.entry)?
                .is_some_and(|e| e.has_tag(self.config.done_tag()));
            if !done {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn gather_init(&self) -> u64 {
        INFINITE_DISTANCE
    }

    fn gather(&self, a: u64, b: u64) -> u64 {
        a.min(b)
    }

    fn apply(&self, current: &u64, gathered: u64) -> Applied<u64> {
        Applied::Updated((*current).min(gathered))
    }

    fn scatter(&self, value: &u64) -> u64 {
        if *value == INFINITE_DISTANCE {
            INFINITE_DISTANCE
        } else {
            value + 1
        }
    }

    fn init(&self, group: &GroupView<'_>, store: &dyn EntryStore) -> Result<u64, UnitError> {
        let seeded = match store.get(&self.seed_key(group.vertex))? {
            Some(raw) => parse_distance(&raw)?,
            None => INFINITE_DISTANCE,
        };

        let key = self.distance_key(group.vertex);
        let value = match self.read_distance(store, group.vertex)? {
            Some(previous) => {
                // Never raise a distance persisted by an earlier run
                let value = previous.min(seeded);
                store.update(&key, value.to_string().into_bytes())?;
                value
            }
            None => {
                let tags: TagSet = self.bfs.result_tags.iter().map(String::as_str).collect();
                store.create(tags, seeded.to_string().into_bytes(), key)?;
                seeded
            }
        };
        trace!("BFS init of {} in {}: {}", group.vertex, group.domain, value);
        Ok(value)
    }

    fn save_output(&self, group: &GroupView<'_>, store: &dyn EntryStore, value: &u64) -> Result<(), UnitError> {
        store.update(&self.distance_key(group.vertex), value.to_string().into_bytes())?;
        if self.bfs.speculative_complete {
            for edge in &group.adjacency.out_edges {
                store.add_tag(&edge.entry, self.config.speculative_tag())?;
            }
        }
        Ok(())
    }
}
