//! Replicated dense LU for the coarsest level.
//!
//! The operator is gathered on every rank and factored with Faer's full-pivoting LU; each
//! apply gathers the right-hand side, solves redundantly and keeps the owned slice. A
//! non-finite solution (singular coarse operator) leaves `x` untouched and logs a warning,
//! so the caller observes an unreduced residual instead of an error.

use std::fmt;
use std::sync::Arc;

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, MatMut};
use log::{debug, warn};

use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::{CrsMatrix, gather_dense, gather_vector};
use crate::preconditioner::{Smoother, not_set_up};

/// Above this size the replicated dense factorization dominates setup.
const LARGE_COARSE_ROWS: usize = 5000;

pub struct DirectSolver {
    a: Option<Arc<CrsMatrix>>,
    factor: Option<FullPivLu<f64>>,
}

impl fmt::Debug for DirectSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectSolver")
            .field("rows", &self.a.as_ref().map(|a| a.global_num_rows()))
            .field("factored", &self.factor.is_some())
            .finish()
    }
}

impl DirectSolver {
    pub fn new() -> Self {
        DirectSolver { a: None, factor: None }
    }
}

impl Default for DirectSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Smoother for DirectSolver {
    fn name(&self) -> &str {
        "direct LU"
    }

    fn setup(&mut self, a: Arc<CrsMatrix>) -> Result<(), MgError> {
        if a.global_num_rows() != a.global_num_cols()? {
            return Err(MgError::dim("direct solve needs a square operator"));
        }
        if a.global_num_rows() > LARGE_COARSE_ROWS {
            warn!("direct coarse solve on {} rows; consider a larger coarsening budget", a.global_num_rows());
        }
        let dense = gather_dense(&a)?;
        debug!("factoring {}x{} coarse operator", dense.nrows(), dense.ncols());
        self.factor = Some(FullPivLu::new(dense.as_ref()));
        self.a = Some(a);
        Ok(())
    }

    fn apply(&self, b: &DistVector, x: &mut DistVector, zero_guess: bool) -> Result<(), MgError> {
        let (Some(a), Some(factor)) = (self.a.as_ref(), self.factor.as_ref()) else {
            return Err(not_set_up(self.name()));
        };
        let mut r = b.clone();
        if !zero_guess {
            a.residual(x, b, &mut r)?;
        }
        let mut sol = gather_vector(&r);
        let n = sol.len();
        factor.solve_in_place_with_conj(Conj::No, MatMut::from_column_major_slice_mut(&mut sol, n, 1));
        if sol.iter().any(|v| !v.is_finite()) {
            warn!("coarse direct solve produced non-finite values; skipping correction");
            return Ok(());
        }
        let owned = &sol[a.row_map().local_range()];
        if zero_guess {
            x.local_mut().copy_from_slice(owned);
        } else {
            x.local_mut().iter_mut().zip(owned).for_each(|(xi, ci)| *xi += ci);
        }
        Ok(())
    }
}
