//! Distributed sparse kernels: product, transpose, linear combination and the Galerkin
//! triple product.
//!
//! All kernels are collective and return filled matrices. The local part of a product runs
//! through faer's sequential sparse kernels on a compressed column block, so results are
//! bitwise reproducible for a given partition.

use std::collections::BTreeMap;
use std::sync::Arc;

use faer::Par;
use faer::sparse::linalg::matmul::sparse_sparse_matmul;
use faer::sparse::{SparseRowMat, Triplet};

use crate::core::traits::Operator;
use crate::error::MgError;
use crate::matrix::sparse::CrsMatrix;
use crate::parallel::{Map, par_map_rows};

pub(crate) type GlobalRow = Vec<(usize, f64)>;

/// Owned rows of a filled matrix in global column indices.
pub(crate) fn global_rows(a: &CrsMatrix) -> Result<Vec<GlobalRow>, MgError> {
    let cols = a.col_map()?;
    let block = a.local_block()?;
    Ok(par_map_rows(a.local_num_rows(), |i| {
        block
            .symbolic()
            .col_idx_of_row_raw(i)
            .iter()
            .zip(block.val_of_row(i))
            .map(|(&c, &v)| (cols.local_to_global(c), v))
            .collect()
    }))
}

/// Rows as `[len, cols..]` plus a parallel value stream.
pub(crate) fn pack_rows<'a>(rows: impl Iterator<Item = &'a GlobalRow>) -> (Vec<usize>, Vec<f64>) {
    let mut meta = Vec::new();
    let mut vals = Vec::new();
    for row in rows {
        meta.push(row.len());
        for &(c, v) in row {
            meta.push(c);
            vals.push(v);
        }
    }
    (meta, vals)
}

pub(crate) fn unpack_rows(meta: &[usize], vals: &[f64]) -> Vec<GlobalRow> {
    let mut rows = Vec::new();
    let (mut m, mut k) = (0, 0);
    while m < meta.len() {
        let len = meta[m];
        m += 1;
        let row = (0..len).map(|j| (meta[m + j], vals[k + j])).collect();
        m += len;
        k += len;
        rows.push(row);
    }
    rows
}

/// Fetch the rows of `b` with the given global indices (sorted, unique, not owned here).
fn fetch_remote_rows(b: &CrsMatrix, owned: &[GlobalRow], gids: &[usize]) -> Result<Vec<GlobalRow>, MgError> {
    let map = b.row_map();
    let comm = map.comm();
    let mut requests = vec![Vec::new(); comm.size()];
    for &g in gids {
        requests[map.owner_of(g)?].push(g);
    }
    let asked = comm.all_to_all_usize(requests);
    let mut meta = Vec::with_capacity(asked.len());
    let mut vals = Vec::with_capacity(asked.len());
    for wanted in &asked {
        let rows = wanted
            .iter()
            .map(|&g| {
                map.global_to_local(g)
                    .map(|l| &owned[l])
                    .ok_or(MgError::OutOfRange { index: g, bound: map.global_len() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let (m, v) = pack_rows(rows.into_iter());
        meta.push(m);
        vals.push(v);
    }
    let meta = comm.all_to_all_usize(meta);
    let vals = comm.all_to_all_f64(vals);
    // requests went out grouped by owner in ascending gid order; owners are ascending in gid
    Ok(meta
        .iter()
        .zip(&vals)
        .flat_map(|(m, v)| unpack_rows(m, v))
        .collect())
}

/// C = A·B. A's domain map must match B's row map.
pub fn multiply(a: &CrsMatrix, b: &CrsMatrix) -> Result<CrsMatrix, MgError> {
    if !a.domain_map()?.is_same_as(b.row_map()) {
        return Err(MgError::dim(format!(
            "multiply: domain of {} does not match rows of {}",
            a.label_str(),
            b.label_str()
        )));
    }
    let cols = a.col_map()?;
    let b_owned = global_rows(b)?;
    let b_ghost = fetch_remote_rows(b, &b_owned, cols.ghosts())?;
    // rows of B in A's local column order
    let b_rows: Vec<&GlobalRow> = b_owned.iter().chain(&b_ghost).collect();

    // B's global columns reached from here, compressed to 0..reached.len()
    let mut reached: Vec<usize> = b_rows.iter().flat_map(|r| r.iter().map(|&(j, _)| j)).collect();
    reached.sort_unstable();
    reached.dedup();
    let triplets: Vec<Triplet<usize, usize, f64>> = b_rows
        .iter()
        .enumerate()
        .flat_map(|(k, row)| {
            let reached = &reached;
            row.iter()
                .map(move |&(j, v)| Triplet::new(k, reached.partition_point(|&x| x < j), v))
        })
        .collect();
    let b_block = SparseRowMat::<usize, f64>::try_new_from_triplets(cols.len(), reached.len(), &triplets)?;

    // (A·B)^T = B^T·A^T in column-major form is A·B in row-major form
    let a_block = a.local_block()?;
    let c = sparse_sparse_matmul(b_block.transpose(), a_block.transpose(), 1.0, Par::Seq)?.into_transpose();
    let rows = par_map_rows(a.local_num_rows(), |i| {
        c.symbolic()
            .col_idx_of_row_raw(i)
            .iter()
            .zip(c.val_of_row(i))
            .map(|(&j, &v)| (reached[j], v))
            .collect::<GlobalRow>()
    });
    CrsMatrix::from_global_rows(
        Arc::clone(a.row_map()),
        rows,
        Arc::clone(b.domain_map()?),
        Arc::clone(a.range_map()?),
    )
}

/// Explicit transpose; rows of the result are distributed like A's domain map.
pub fn transpose(a: &CrsMatrix) -> Result<CrsMatrix, MgError> {
    let domain: Arc<Map> = Arc::clone(a.domain_map()?);
    let comm = domain.comm();
    let mut meta = vec![Vec::new(); comm.size()];
    let mut vals = vec![Vec::new(); comm.size()];
    let start = a.row_map().min_global();
    for (i, row) in global_rows(a)?.into_iter().enumerate() {
        for (c, v) in row {
            let owner = domain.owner_of(c)?;
            meta[owner].push(c);
            meta[owner].push(start + i);
            vals[owner].push(v);
        }
    }
    let meta = comm.all_to_all_usize(meta);
    let vals = comm.all_to_all_f64(vals);
    let first = domain.min_global();
    let mut rows: Vec<GlobalRow> = vec![Vec::new(); domain.local_len()];
    for (m, v) in meta.iter().zip(&vals) {
        for (pair, &val) in m.chunks_exact(2).zip(v) {
            rows[pair[0] - first].push((pair[1], val));
        }
    }
    CrsMatrix::from_global_rows(Arc::clone(&domain), rows, Arc::clone(a.row_map()), domain)
        .map(|t| t.with_label(format!("{}^T", a.label_str())))
}

/// α·A + β·B over identical row and domain maps.
pub fn add(alpha: f64, a: &CrsMatrix, beta: f64, b: &CrsMatrix) -> Result<CrsMatrix, MgError> {
    if !a.row_map().is_same_as(b.row_map()) || !a.domain_map()?.is_same_as(b.domain_map()?) {
        return Err(MgError::dim("add: operands have different maps"));
    }
    let ra = global_rows(a)?;
    let rb = global_rows(b)?;
    let rows = ra
        .into_iter()
        .zip(rb)
        .map(|(x, y)| {
            let mut acc: BTreeMap<usize, f64> = BTreeMap::new();
            for (c, v) in x {
                *acc.entry(c).or_insert(0.0) += alpha * v;
            }
            for (c, v) in y {
                *acc.entry(c).or_insert(0.0) += beta * v;
            }
            acc.into_iter().collect()
        })
        .collect();
    CrsMatrix::from_global_rows(
        Arc::clone(a.row_map()),
        rows,
        Arc::clone(a.domain_map()?),
        Arc::clone(a.range_map()?),
    )
}

/// Galerkin product R·A·P.
pub fn triple_product(r: &CrsMatrix, a: &CrsMatrix, p: &CrsMatrix) -> Result<CrsMatrix, MgError> {
    let ap = multiply(a, p)?;
    multiply(r, &ap)
}
