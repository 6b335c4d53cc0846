//! Spectral radius estimate of the Jacobi-scaled operator D⁻¹A.

use crate::core::traits::Operator;
use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;

/// Collective: power iteration on D⁻¹A with a D-weighted Rayleigh quotient.
///
/// The start vector depends only on global indices, so the estimate is identical for
/// every partition of the same operator up to reduction round-off.
pub fn estimate_lambda_max(a: &CrsMatrix, inv_diag: &[f64], iters: usize) -> Result<f64, MgError> {
    let map = a.row_map().clone();
    let mut x = DistVector::from_global_fn(map.clone(), |g| 1.0 + ((g * 7919) % 101) as f64 / 101.0);
    let mut ax = DistVector::zeros(map.clone());
    let mut dx = DistVector::zeros(map);
    let mut lambda = 0.0;
    for _ in 0..iters.max(1) {
        let nrm = x.norm2();
        if nrm == 0.0 {
            break;
        }
        x.scale(1.0 / nrm);
        a.matvec(&x, &mut ax)?;
        for ((d, xi), di) in dx.local_mut().iter_mut().zip(x.local()).zip(inv_diag) {
            *d = xi / di;
        }
        let denom = x.dot(&dx);
        if denom == 0.0 {
            break;
        }
        lambda = x.dot(&ax) / denom;
        for ((xi, yi), di) in x.local_mut().iter_mut().zip(ax.local()).zip(inv_diag) {
            *xi = yi * di;
        }
    }
    Ok(lambda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery;
    use crate::parallel::SerialComm;
    use crate::preconditioner::inverse_diagonal;
    use std::sync::Arc;

    #[test]
    fn laplacian_estimate_is_close_to_two() {
        let a = gallery::laplace_1d(50, Arc::new(SerialComm)).unwrap();
        let d = inverse_diagonal(&a).unwrap();
        let l = estimate_lambda_max(&a, &d, 30).unwrap();
        // exact: 1 - cos(50π/51) ≈ 1.998
        assert!(l > 1.7 && l <= 2.0, "estimate {l}");
    }

    #[test]
    fn diagonal_operator_is_exact() {
        let a = gallery::laplace_1d(1, Arc::new(SerialComm)).unwrap();
        let d = inverse_diagonal(&a).unwrap();
        assert_eq!(estimate_lambda_max(&a, &d, 3).unwrap(), 1.0);
    }
}
