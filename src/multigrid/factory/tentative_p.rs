//! Tentative prolongator from aggregates and the near-nullspace.
//!
//! For every aggregate the nullspace rows of its dofs form a block B (m × k). A thin
//! Householder QR B = Q·R gives the aggregate's block of P (Q) and its k coarse nullspace
//! rows (R), so Ptent·B_coarse = B and Ptentᵀ·Ptent = I. Signs follow the factorization.
//! Dofs of unaggregated (Dirichlet) nodes get empty rows.

use std::sync::Arc;

use faer::Mat;
use log::debug;

use crate::core::vector::MultiVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};
use crate::parallel::Map;

const RANK_TOL: f64 = 1e-12;

/// Householder QR of the `dofs` rows of `ns`. `None` if the block is rank deficient.
fn thin_qr(dofs: &[usize], ns: &MultiVector) -> Option<(Mat<f64>, Mat<f64>)> {
    let m = dofs.len();
    let k = ns.num_vectors();
    if m < k {
        return None;
    }
    let b = Mat::from_fn(m, k, |i, j| ns.get(dofs[i], j));
    let qr = b.qr();
    let r = qr.thin_R().to_owned();
    for j in 0..k {
        let col = b.col(j).norm_l2();
        if col == 0.0 || r[(j, j)].abs() <= RANK_TOL * col {
            return None;
        }
    }
    Some((qr.compute_thin_Q(), r))
}

/// `A`, `Aggregates`, `Nullspace` → `Ptent`, coarse `Nullspace`.
#[derive(Debug, Clone, Default)]
pub struct TentativePFactory;

impl Factory for TentativePFactory {
    fn name(&self) -> &str {
        "TentativePFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![
            Input::here(DataKey::A),
            Input::here(DataKey::Aggregates),
            Input::here(DataKey::Nullspace),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::Ptent), Output::coarser(DataKey::Nullspace)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Structure
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let a = ctx.matrix(DataKey::A)?;
        let aggs = ctx.aggregates()?;
        let ns = ctx.vectors(DataKey::Nullspace)?;
        let rows = a.row_map();
        if !ns.map().is_same_as(rows) {
            return Err(ctx.fail("nullspace is not distributed like the operator rows"));
        }
        let n_nodes = aggs.node_map().global_len();
        if n_nodes == 0 || rows.global_len() % n_nodes != 0 {
            return Err(ctx.fail(format!("{} rows do not split into {n_nodes} nodes", rows.global_len())));
        }
        let blk = rows.global_len() / n_nodes;
        let k = ns.num_vectors();
        let n_aggs = aggs.num_local_aggregates();
        let comm = rows.comm();

        let coarse_map = Arc::new(Map::from_local_len(n_aggs * k, Arc::clone(comm)));
        let c0 = coarse_map.min_global();
        let mut p_rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); rows.local_len()];
        let mut coarse_ns = Mat::<f64>::zeros(n_aggs * k, k);
        let mut deficient = 0usize;
        for (agg, nodes) in aggs.members().iter().enumerate() {
            let dofs: Vec<usize> = nodes.iter().flat_map(|&n| (0..blk).map(move |d| n * blk + d)).collect();
            let Some((q, r)) = thin_qr(&dofs, &ns) else {
                deficient += 1;
                continue;
            };
            for (i, &dof) in dofs.iter().enumerate() {
                for j in 0..k {
                    if q[(i, j)] != 0.0 {
                        p_rows[dof].push((c0 + agg * k + j, q[(i, j)]));
                    }
                }
            }
            for i in 0..k {
                for j in i..k {
                    coarse_ns[(agg * k + i, j)] = r[(i, j)];
                }
            }
        }
        let deficient = comm.all_reduce_sum_usize(deficient);
        if deficient > 0 {
            return Err(ctx.fail(format!("nullspace is rank deficient on {deficient} aggregate(s)")));
        }

        let ptent = CrsMatrix::from_global_rows(Arc::clone(rows), p_rows, Arc::clone(&coarse_map), Arc::clone(rows))?
            .with_label(format!("Ptent{}", ctx.level()));
        debug!(
            "level {}: tentative prolongator {}x{} ({} nullspace vectors)",
            ctx.level(),
            ptent.global_num_rows(),
            coarse_map.global_len(),
            k
        );
        let coarse_ns = MultiVector::from_local(coarse_map, coarse_ns)?;
        ctx.set(DataKey::Ptent, Rel::Here, LevelValue::Transfer(Arc::new(ptent)))?;
        ctx.set(DataKey::Nullspace, Rel::Coarser, LevelValue::VectorSet(Arc::new(coarse_ns)))
    }
}
