//! Uncoupled aggregation of the node graph.
//!
//! Aggregates never span ranks; off-rank neighbors are ignored. Within a rank nodes are
//! visited in increasing global id and aggregate ids are handed out in the order their
//! roots are visited, so the result depends only on the graph and the partition.
//!
//! `Uncoupled` runs four phases:
//! 1. a free node whose free neighborhood is large enough (and which touches at most
//!    `max_selected_neighbors` aggregated nodes) becomes a root with its free neighbors;
//! 2a. the same with the neighbor limit lifted, for nodes with at least
//!    `min_agg_size - 1` free neighbors;
//! 2b. each remaining node joins the adjacent aggregate it has the most connections to,
//!    ties going to the lowest aggregate id;
//! 3. leftovers become aggregates with whatever free neighbors they still have.
//!
//! `Pairwise` pairs each node with its strongest free neighbor, then pairs the pairs.
//! Dirichlet nodes are never aggregated.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AggregationType;
use crate::error::MgError;
use crate::multigrid::factory::{AmalgamatedGraph, BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};
use crate::parallel::Map;

#[derive(Debug, Clone)]
pub struct Aggregates {
    node_map: Arc<Map>,
    /// One coarse node per aggregate.
    agg_map: Arc<Map>,
    vertex2agg: Vec<Option<usize>>,
    num_aggs: usize,
}

impl Aggregates {
    /// Collective: `vertex2agg` holds local aggregate ids `0..num_aggs`.
    pub fn new(node_map: Arc<Map>, vertex2agg: Vec<Option<usize>>, num_aggs: usize) -> Self {
        let agg_map = Arc::new(Map::from_local_len(num_aggs, Arc::clone(node_map.comm())));
        Aggregates { node_map, agg_map, vertex2agg, num_aggs }
    }

    pub fn node_map(&self) -> &Arc<Map> {
        &self.node_map
    }

    pub fn agg_map(&self) -> &Arc<Map> {
        &self.agg_map
    }

    pub fn num_local_aggregates(&self) -> usize {
        self.num_aggs
    }

    pub fn num_global_aggregates(&self) -> usize {
        self.agg_map.global_len()
    }

    pub fn aggregate_of(&self, node: usize) -> Option<usize> {
        self.vertex2agg[node]
    }

    /// Local node indices of every aggregate, in increasing order.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut m = vec![Vec::new(); self.num_aggs];
        for (node, agg) in self.vertex2agg.iter().enumerate() {
            if let Some(a) = agg {
                m[*a].push(node);
            }
        }
        m
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.members().iter().map(Vec::len).collect()
    }
}

#[derive(Debug, Clone)]
pub struct AggregationFactory {
    pub kind: AggregationType,
    pub min_agg_size: usize,
    pub max_agg_size: usize,
    pub max_selected_neighbors: usize,
}

impl Default for AggregationFactory {
    fn default() -> Self {
        AggregationFactory {
            kind: AggregationType::Uncoupled,
            min_agg_size: 2,
            max_agg_size: usize::MAX,
            max_selected_neighbors: 0,
        }
    }
}

struct Builder<'g> {
    graph: &'g AmalgamatedGraph,
    agg: Vec<Option<usize>>,
    count: usize,
}

impl<'g> Builder<'g> {
    fn new(graph: &'g AmalgamatedGraph) -> Self {
        Builder { graph, agg: vec![None; graph.num_local_nodes()], count: 0 }
    }

    fn free(&self, n: usize) -> bool {
        self.agg[n].is_none() && !self.graph.is_dirichlet(n)
    }

    fn free_neighbors(&self, n: usize) -> Vec<usize> {
        self.graph.local_neighbors(n).filter(|&j| self.free(j)).collect()
    }

    fn open(&mut self, members: &[usize]) {
        for &m in members {
            self.agg[m] = Some(self.count);
        }
        self.count += 1;
    }

    fn root_phase(&mut self, min: usize, max: usize, max_selected: Option<usize>) {
        for i in 0..self.agg.len() {
            if !self.free(i) {
                continue;
            }
            if let Some(limit) = max_selected {
                let taken = self.graph.local_neighbors(i).filter(|&j| self.agg[j].is_some()).count();
                if taken > limit {
                    continue;
                }
            }
            let mut members = vec![i];
            members.extend(self.free_neighbors(i).into_iter().take(max.saturating_sub(1)));
            if members.len() >= min {
                self.open(&members);
            }
        }
    }

    fn join_phase(&mut self) {
        for i in 0..self.agg.len() {
            if !self.free(i) {
                continue;
            }
            let mut links: BTreeMap<usize, usize> = BTreeMap::new();
            for j in self.graph.local_neighbors(i) {
                if let Some(a) = self.agg[j] {
                    *links.entry(a).or_insert(0) += 1;
                }
            }
            // BTreeMap iterates ids upward; keep the first maximum
            let mut best: Option<(usize, usize)> = None;
            for (a, c) in links {
                if best.is_none_or(|(_, bc)| c > bc) {
                    best = Some((a, c));
                }
            }
            if let Some((a, _)) = best {
                self.agg[i] = Some(a);
            }
        }
    }

    fn leftover_phase(&mut self) {
        for i in 0..self.agg.len() {
            if self.free(i) {
                let mut members = vec![i];
                members.extend(self.free_neighbors(i));
                self.open(&members);
            }
        }
    }

    fn finish(self) -> (Vec<Option<usize>>, usize) {
        (self.agg, self.count)
    }
}

fn uncoupled(graph: &AmalgamatedGraph, f: &AggregationFactory) -> (Vec<Option<usize>>, usize) {
    let mut b = Builder::new(graph);
    b.root_phase(f.min_agg_size, f.max_agg_size, Some(f.max_selected_neighbors));
    b.root_phase(f.min_agg_size, f.max_agg_size, None);
    b.join_phase();
    b.leftover_phase();
    b.finish()
}

/// Pair every free node with its strongest free local neighbor (ties: lowest id).
fn pair_nodes(n: usize, skip: impl Fn(usize) -> bool, edges: impl Fn(usize) -> Vec<(usize, f64)>) -> (Vec<Option<usize>>, usize) {
    let mut agg = vec![None; n];
    let mut count = 0;
    for i in 0..n {
        if agg[i].is_some() || skip(i) {
            continue;
        }
        let mut best: Option<(usize, f64)> = None;
        for (j, s) in edges(i) {
            if j != i && agg[j].is_none() && !skip(j) && best.is_none_or(|(bj, bs)| s > bs || (s == bs && j < bj)) {
                best = Some((j, s));
            }
        }
        agg[i] = Some(count);
        if let Some((j, _)) = best {
            agg[j] = Some(count);
        }
        count += 1;
    }
    (agg, count)
}

fn pairwise(graph: &AmalgamatedGraph) -> (Vec<Option<usize>>, usize) {
    let n = graph.num_local_nodes();
    let local_edges = |i: usize| -> Vec<(usize, f64)> {
        graph
            .neighbors(i)
            .iter()
            .zip(graph.weights(i))
            .filter_map(|(&g, &w)| graph.node_map().global_to_local(g).map(|l| (l, w)))
            .collect()
    };
    let (first, n_pairs) = pair_nodes(n, |i| graph.is_dirichlet(i), local_edges);

    // coarse graph between pairs, edge weights summed
    let mut coarse: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n_pairs];
    for i in 0..n {
        let Some(pi) = first[i] else { continue };
        for (j, w) in local_edges(i) {
            if let Some(pj) = first[j] {
                if pj != pi {
                    *coarse[pi].entry(pj).or_insert(0.0) += w;
                }
            }
        }
    }
    let (second, count) = pair_nodes(n_pairs, |_| false, |p| coarse[p].iter().map(|(&q, &w)| (q, w)).collect());
    let agg = first.into_iter().map(|p| p.and_then(|p| second[p])).collect();
    (agg, count)
}

impl AggregationFactory {
    /// Collective.
    pub fn aggregate(&self, graph: &AmalgamatedGraph) -> Aggregates {
        let (v2a, count) = match self.kind {
            AggregationType::Uncoupled => uncoupled(graph, self),
            AggregationType::Pairwise => pairwise(graph),
        };
        Aggregates::new(Arc::clone(graph.node_map()), v2a, count)
    }
}

impl Factory for AggregationFactory {
    fn name(&self) -> &str {
        "AggregationFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(DataKey::Graph)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::Aggregates)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Structure
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let graph = ctx.graph()?;
        let aggs = self.aggregate(&graph);
        if aggs.num_global_aggregates() == 0 {
            return Err(ctx.fail("aggregation produced no aggregates"));
        }
        ctx.set(DataKey::Aggregates, Rel::Here, LevelValue::Aggregates(Arc::new(aggs)))
    }
}
