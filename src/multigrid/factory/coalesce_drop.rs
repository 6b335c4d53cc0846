//! Node graph of an operator: amalgamate `block_size` consecutive rows into one node and
//! drop weak couplings.
//!
//! An off-diagonal entry aᵢⱼ is kept when aᵢⱼ² > tol²·|aᵢᵢ·aⱼⱼ|; with `tol = 0` every
//! structurally nonzero coupling survives. A row with no surviving off-diagonal coupling
//! is a Dirichlet row, and a node with any Dirichlet row is excluded from aggregation.

use std::sync::Arc;

use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};
use crate::parallel::{Map, par_map_rows};

#[derive(Debug, Clone)]
pub struct AmalgamatedGraph {
    node_map: Arc<Map>,
    block_size: usize,
    ptr: Vec<usize>,
    /// Global node ids of neighbors, sorted, self excluded.
    adj: Vec<usize>,
    /// Strength of each kept coupling: max over the block of |aᵢⱼ| / sqrt(|aᵢᵢ·aⱼⱼ|).
    weights: Vec<f64>,
    dirichlet: Vec<bool>,
}

impl AmalgamatedGraph {
    pub fn node_map(&self) -> &Arc<Map> {
        &self.node_map
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_local_nodes(&self) -> usize {
        self.dirichlet.len()
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.adj[self.ptr[node]..self.ptr[node + 1]]
    }

    pub fn weights(&self, node: usize) -> &[f64] {
        &self.weights[self.ptr[node]..self.ptr[node + 1]]
    }

    pub fn is_dirichlet(&self, node: usize) -> bool {
        self.dirichlet[node]
    }

    /// Neighbors owned by this rank, as local node indices.
    pub fn local_neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.neighbors(node).iter().filter_map(|&g| self.node_map.global_to_local(g))
    }

    /// Collective.
    pub fn build(a: &CrsMatrix, block_size: usize, drop_tol: f64) -> Result<Self, MgError> {
        let rows = a.row_map();
        if block_size == 0 {
            return Err(MgError::InvalidParameter {
                key: "number of equations".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let misaligned = rows.min_global() % block_size != 0 || rows.local_len() % block_size != 0;
        let misaligned_ranks = rows.comm().all_reduce_sum_usize(usize::from(misaligned));
        if misaligned_ranks > 0 {
            return Err(MgError::InvalidParameter {
                key: "number of equations".to_string(),
                reason: format!("row slices of {misaligned_ranks} rank(s) are not aligned to blocks of {block_size}"),
            });
        }
        let node_map = Arc::new(Map::from_local_len(rows.local_len() / block_size, Arc::clone(rows.comm())));
        let diag = a.local_diag_copy()?;
        let col_diag = a.import_columns(&DistVector::from_local(Arc::clone(rows), diag.clone())?)?;
        let cols = a.col_map()?;
        let tol2 = drop_tol * drop_tol;
        let row_start = rows.min_global();

        // per row: (kept couplings as (node, strength), dirichlet flag)
        let per_row = par_map_rows(rows.local_len(), |i| {
            let g = row_start + i;
            let row = match a.local_row_view(i) {
                Ok(r) => r,
                Err(_) => return (Vec::new(), true),
            };
            let mut kept = Vec::new();
            for (&c, &v) in row.cols.iter().zip(row.vals) {
                let gc = cols.local_to_global(c);
                if gc == g {
                    continue;
                }
                let scale = (diag[i] * col_diag[c]).abs();
                if v * v > tol2 * scale {
                    let strength = if scale > 0.0 { v.abs() / scale.sqrt() } else { v.abs() };
                    kept.push((gc / block_size, strength));
                }
            }
            let dirichlet = kept.is_empty();
            (kept, dirichlet)
        });

        let n_nodes = node_map.local_len();
        let node_start = node_map.min_global();
        let mut ptr = Vec::with_capacity(n_nodes + 1);
        let mut adj = Vec::new();
        let mut weights = Vec::new();
        let mut dirichlet = vec![false; n_nodes];
        ptr.push(0);
        for (node, chunk) in per_row.chunks(block_size).enumerate() {
            let mut merged: Vec<(usize, f64)> = chunk
                .iter()
                .flat_map(|(kept, _)| kept.iter().copied())
                .filter(|&(n, _)| n != node_start + node)
                .collect();
            merged.sort_by_key(|&(n, _)| n);
            let mut last: Option<usize> = None;
            for (n, s) in merged {
                if last == Some(n) {
                    if let Some(w) = weights.last_mut() {
                        *w = f64::max(*w, s);
                    }
                } else {
                    adj.push(n);
                    weights.push(s);
                    last = Some(n);
                }
            }
            ptr.push(adj.len());
            dirichlet[node] = chunk.iter().any(|(_, d)| *d);
        }
        Ok(AmalgamatedGraph { node_map, block_size, ptr, adj, weights, dirichlet })
    }
}

/// `A` → `Graph`.
#[derive(Debug, Clone)]
pub struct CoalesceDropFactory {
    pub num_equations: usize,
    pub drop_tol: f64,
}

impl Factory for CoalesceDropFactory {
    fn name(&self) -> &str {
        "CoalesceDropFactory"
    }

    fn declare_inputs(&self, level: &Level) -> Vec<Input> {
        let mut inputs = vec![Input::here(DataKey::A)];
        // coarse block size is the dimension of that level's nullspace
        if level.index() > 0 {
            inputs.push(Input::here(DataKey::Nullspace));
        }
        inputs
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::Graph)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Structure
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let a = ctx.matrix(DataKey::A)?;
        let block = if ctx.level() == 0 {
            self.num_equations
        } else {
            ctx.vectors(DataKey::Nullspace)?.num_vectors()
        };
        let graph = AmalgamatedGraph::build(&a, block, self.drop_tol)?;
        ctx.set(DataKey::Graph, Rel::Here, LevelValue::Graph(Arc::new(graph)))
    }
}
