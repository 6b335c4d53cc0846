//! Model problems.

use std::sync::Arc;

use crate::error::MgError;
use crate::matrix::sparse::CrsMatrix;
use crate::parallel::{Comm, Map};

/// Collective: tridiagonal [-1, 2, -1] of size `n`, rows split uniformly.
pub fn laplace_1d(n: usize, comm: Arc<dyn Comm>) -> Result<CrsMatrix, MgError> {
    let map = Arc::new(Map::uniform(n, comm));
    let rows = map
        .local_range()
        .map(|g| {
            let mut r = Vec::with_capacity(3);
            if g > 0 {
                r.push((g - 1, -1.0));
            }
            r.push((g, 2.0));
            if g + 1 < n {
                r.push((g + 1, -1.0));
            }
            r
        })
        .collect();
    Ok(CrsMatrix::from_global_rows(Arc::clone(&map), rows, Arc::clone(&map), map)?.with_label("Laplace1D"))
}

/// Collective: 5-point Laplacian on an `nx` by `ny` grid, lexicographic ordering.
pub fn laplace_2d(nx: usize, ny: usize, comm: Arc<dyn Comm>) -> Result<CrsMatrix, MgError> {
    let map = Arc::new(Map::uniform(nx * ny, comm));
    let rows = map
        .local_range()
        .map(|g| {
            let (i, j) = (g % nx, g / nx);
            let mut r = Vec::with_capacity(5);
            if j > 0 {
                r.push((g - nx, -1.0));
            }
            if i > 0 {
                r.push((g - 1, -1.0));
            }
            r.push((g, 4.0));
            if i + 1 < nx {
                r.push((g + 1, -1.0));
            }
            if j + 1 < ny {
                r.push((g + nx, -1.0));
            }
            r
        })
        .collect();
    Ok(CrsMatrix::from_global_rows(Arc::clone(&map), rows, Arc::clone(&map), map)?.with_label("Laplace2D"))
}
