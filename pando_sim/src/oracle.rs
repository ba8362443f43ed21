//! Ground truth oracle for simulation.
//!
//! The Oracle generates the workload a scenario feeds into the store and
//! computes, independently of the engine, what the store must hold once
//! dispatch settles:
//! - Transaction records, exchange rates and the USD outputs they imply
//! - Pair requests and which exchange record ordering will satisfy them
//! - Random transaction graphs and their reference BFS distances

use crate::units::{day_start, usd_out_key, PairRequest, TxOutput, TxRecord, BTC, DOGE, ETH, SECONDS_PER_DAY};
use pando_core::INFINITE_DISTANCE;
use pando_env::Key;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Midnight of the first simulated day.
pub const EPOCH: i64 = 1_500_076_800;

/// Days covered by generated transactions and rates.
pub const DAYS: i64 = 7;

/// A pair request plus the candidate the harness will satisfy it with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSpec {
    pub request: PairRequest,

    /// Index into [`PairRequest::candidates`]
    pub matched: usize,
}

impl PairSpec {
    pub fn match_key(&self) -> Key {
        self.request.candidates()[self.matched % 4]
    }
}

/// A directed transaction graph seeded at one source vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub edges: Vec<(i64, i64)>,
    pub source: i64,
}

impl GraphSpec {
    pub fn vertices(&self) -> BTreeSet<i64> {
        self.edges.iter().flat_map(|&(a, b)| [a, b]).collect()
    }
}

/// Everything a full-workload scenario inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub transactions: Vec<TxRecord>,
    pub rates: BTreeMap<i64, u64>,
    pub pairs: Vec<PairSpec>,
    pub graph: GraphSpec,
}

/// The Oracle - seeded workload generator and reference model.
pub struct Oracle {
    rng: ChaCha8Rng,
    txids: HashSet<String>,
}

impl Oracle {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            txids: HashSet::new(),
        }
    }

    /// `count` transactions with 1-3 outputs each, spread over [`DAYS`].
    ///
    /// Txid prefixes are unique so no two records share output keys.
    pub fn generate_transactions(&mut self, count: usize) -> Vec<TxRecord> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let txid = format!("{:016x}", self.rng.gen::<u64>());
            if !self.txids.insert(txid[..15].to_string()) {
                continue;
            }
            let outputs = self.rng.gen_range(1..=3u16);
            let vout = (0..outputs)
                .map(|n| TxOutput {
                    value: self.rng.gen_range(1..100_000),
                    n,
                })
                .collect();
            out.push(TxRecord {
                txid,
                time: EPOCH + self.rng.gen_range(0..DAYS * SECONDS_PER_DAY),
                vout,
            });
        }
        out
    }

    /// One rate (cents per unit) per simulated day, keyed by day start.
    pub fn generate_rates(&mut self) -> BTreeMap<i64, u64> {
        (0..DAYS)
            .map(|d| (EPOCH + d * SECONDS_PER_DAY, self.rng.gen_range(100..5_000_000)))
            .collect()
    }

    pub fn generate_pairs(&mut self, count: usize) -> Vec<PairSpec> {
        let coins = [BTC, ETH, DOGE];
        (0..count)
            .map(|_| {
                let from = coins[self.rng.gen_range(0..coins.len())];
                let to = loop {
                    let c = coins[self.rng.gen_range(0..coins.len())];
                    if c != from {
                        break c;
                    }
                };
                PairSpec {
                    request: PairRequest {
                        from,
                        to,
                        first: self.rng.gen_range(1..i64::MAX >> 4),
                        second: self.rng.gen_range(1..i64::MAX >> 4),
                    },
                    matched: self.rng.gen_range(0..4),
                }
            })
            .collect()
    }

    /// Random graph over `vertices` vertices rooted at vertex 0.
    ///
    /// Each vertex `v > 0` hangs off a random earlier vertex with probability
    /// 0.9, so some vertices are only reachable through extra edges or not at
    /// all. `extra_edges` random edges are added on top.
    pub fn generate_graph(&mut self, vertices: usize, extra_edges: usize) -> GraphSpec {
        let n = vertices.max(2) as i64;
        let mut edges = BTreeSet::new();
        edges.insert((0, 1));
        for v in 2..n {
            if self.rng.gen_bool(0.9) {
                edges.insert((self.rng.gen_range(0..v), v));
            }
        }
        for _ in 0..extra_edges {
            let a = self.rng.gen_range(0..n);
            let b = self.rng.gen_range(0..n);
            if a != b {
                edges.insert((a, b));
            }
        }
        GraphSpec {
            edges: edges.into_iter().collect(),
            source: 0,
        }
    }

    pub fn generate_workload(&mut self, records: usize, vertices: usize, extra_edges: usize) -> Workload {
        Workload {
            transactions: self.generate_transactions(records),
            rates: self.generate_rates(),
            pairs: self.generate_pairs(records),
            graph: self.generate_graph(vertices, extra_edges),
        }
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

/// USD output entries `transactions` must produce under `rates`.
///
/// Transactions whose day has no rate produce nothing.
pub fn expected_usd(transactions: &[TxRecord], rates: &BTreeMap<i64, u64>) -> BTreeMap<Key, u64> {
    let mut out = BTreeMap::new();
    for tx in transactions {
        let (Ok(tx_key), Some(rate)) = (tx.tx_key(), rates.get(&day_start(tx.time))) else {
            continue;
        };
        for o in &tx.vout {
            out.insert(usd_out_key(o.n, tx.time, tx_key), o.value * rate);
        }
    }
    out
}

/// Plain queue-based BFS over the graph's vertices.
pub fn reference_distances(graph: &GraphSpec) -> BTreeMap<i64, u64> {
    let mut adjacency: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for &(a, b) in &graph.edges {
        adjacency.entry(a).or_default().push(b);
    }
    let vertices = graph.vertices();
    let mut dist: BTreeMap<i64, u64> = vertices.iter().map(|v| (*v, INFINITE_DISTANCE)).collect();
    if !vertices.contains(&graph.source) {
        return dist;
    }

    dist.insert(graph.source, 0);
    let mut queue = VecDeque::from([graph.source]);
    while let Some(u) = queue.pop_front() {
        let next = dist[&u] + 1;
        for w in adjacency.get(&u).into_iter().flatten() {
            if dist[w] == INFINITE_DISTANCE {
                dist.insert(*w, next);
                queue.push_back(*w);
            }
        }
    }
    dist
}
