//! Replicated dense copies of small distributed objects, stored as `faer::Mat`.
//!
//! Used by the coarse-grid direct solver: the coarsest operator is gathered onto every
//! rank and factored redundantly.

use faer::Mat;

use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::ops::{global_rows, pack_rows, unpack_rows};
use crate::matrix::sparse::CrsMatrix;

/// Collective: the full matrix on every rank.
pub fn gather_dense(a: &CrsMatrix) -> Result<Mat<f64>, MgError> {
    let nrows = a.global_num_rows();
    let ncols = a.global_num_cols()?;
    let rows = global_rows(a)?;
    let (meta, vals) = pack_rows(rows.iter());
    let comm = a.comm();
    let meta = comm.all_gather_usize(&meta);
    let vals = comm.all_gather_f64(&vals);
    let mut dense = Mat::zeros(nrows, ncols);
    let mut i = 0;
    for (m, v) in meta.iter().zip(&vals) {
        for row in unpack_rows(m, v) {
            for (j, x) in row {
                dense[(i, j)] = x;
            }
            i += 1;
        }
    }
    Ok(dense)
}

/// Collective: every global entry of `x`, in global order.
pub fn gather_vector(x: &DistVector) -> Vec<f64> {
    x.map()
        .comm()
        .all_gather_f64(x.local())
        .into_iter()
        .flatten()
        .collect()
}
