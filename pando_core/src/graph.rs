//! Graph index - vertex groups derived from stored edge entries.
//!
//! An entry keyed `(a, b, c)` is read as an edge `b -> c` in the graph of
//! domain `a`. It gives vertex `b` an out-edge and vertex `c` an in-edge,
//! both referencing the entry key. Random keys never describe edges.

use pando_env::{ChainInfo, EntryStore, Key, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;

/// Vertex identifier within one graph domain.
pub type VertexId = i64;

/// One edge as seen from a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// The vertex at the other end
    pub peer: VertexId,

    /// The entry that declares the edge
    pub entry: Key,
}

/// In- and out-edges of one vertex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Adjacency {
    pub out_edges: Vec<Edge>,
    pub in_edges: Vec<Edge>,
}

impl Adjacency {
    pub fn out_degree(&self) -> usize {
        self.out_edges.len()
    }

    pub fn in_degree(&self) -> usize {
        self.in_edges.len()
    }
}

/// All vertices of one graph domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Graph {
    pub domain: ChainInfo,
    pub vertices: BTreeMap<VertexId, Adjacency>,
}

impl Graph {
    pub fn new(domain: ChainInfo) -> Self {
        Self {
            domain,
            vertices: BTreeMap::new(),
        }
    }

    /// Adds the edge declared by `key`. Keys of another domain are ignored.
    pub fn add_edge(&mut self, key: Key) {
        if key.domain != self.domain || key.is_random() {
            return;
        }
        let (from, to) = (key.b, key.c);
        self.vertices.entry(from).or_default().out_edges.push(Edge {
            peer: to,
            entry: key,
        });
        self.vertices.entry(to).or_default().in_edges.push(Edge {
            peer: from,
            entry: key,
        });
    }

    pub fn adjacency(&self, vertex: VertexId) -> Option<&Adjacency> {
        self.vertices.get(&vertex)
    }

    pub fn contains(&self, vertex: VertexId) -> bool {
        self.vertices.contains_key(&vertex)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.vertices.values().map(Adjacency::out_degree).sum()
    }

    /// Vertices without out-edges; these hold the terminal results.
    pub fn sinks(&self) -> Vec<VertexId> {
        self.vertices
            .iter()
            .filter(|(_, adj)| adj.out_edges.is_empty())
            .map(|(v, _)| *v)
            .collect()
    }
}

/// Builds per-domain graphs from a store snapshot.
pub struct GraphIndex;

impl GraphIndex {
    /// Indexes every non-random key, one graph per domain, in domain order.
    pub fn build(store: &dyn EntryStore) -> Result<Vec<Graph>, StoreError> {
        let mut graphs: BTreeMap<ChainInfo, Graph> = BTreeMap::new();
        for key in store.keys()? {
            if key.is_random() {
                continue;
            }
            graphs
                .entry(key.domain)
                .or_insert_with(|| Graph::new(key.domain))
                .add_edge(key);
        }
        Ok(graphs.into_values().collect())
    }

    /// Indexes only the keys of `domain`.
    pub fn build_domain(store: &dyn EntryStore, domain: ChainInfo) -> Result<Graph, StoreError> {
        let mut graph = Graph::new(domain);
        for key in store.keys()? {
            graph.add_edge(key);
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use pando_env::{SystemContext, TagSet};

    const EDGES: ChainInfo = ChainInfo::pack(1, 3, 0);
    const OTHER: ChainInfo = ChainInfo::pack(1, 4, 0);

    #[test]
    fn test_add_edge_creates_both_vertices() {
        let mut g = Graph::new(EDGES);
        g.add_edge(Key::new(EDGES, 1, 2));
        g.add_edge(Key::new(EDGES, 1, 3));

        assert_eq!(g.vertex_count(), 3);
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.adjacency(1).map(Adjacency::out_degree), Some(2));
        assert_eq!(g.adjacency(2).map(Adjacency::in_degree), Some(1));
        assert_eq!(g.sinks(), vec![2, 3]);
    }

    #[test]
    fn test_build_groups_by_domain_and_skips_random() {
        let store = MemoryStore::new(SystemContext::shared());
        store.create(TagSet::new(), vec![], Key::new(EDGES, 1, 2)).unwrap();
        store.create(TagSet::new(), vec![], Key::new(OTHER, 5, 6)).unwrap();
        store.create(TagSet::new(), vec![], Key::SENTINEL).unwrap();

        let graphs = GraphIndex::build(&store).unwrap();
        assert_eq!(graphs.len(), 2);
        assert_eq!(graphs[0].domain, EDGES);
        assert!(graphs[0].contains(1) && graphs[0].contains(2));
        assert_eq!(graphs[1].domain, OTHER);

        let only = GraphIndex::build_domain(&store, OTHER).unwrap();
        assert_eq!(only.vertex_count(), 2);
    }

    #[test]
    fn test_self_loop() {
        let mut g = Graph::new(EDGES);
        g.add_edge(Key::new(EDGES, 4, 4));
        assert_eq!(g.vertex_count(), 1);
        assert!(g.sinks().is_empty());
    }
}
