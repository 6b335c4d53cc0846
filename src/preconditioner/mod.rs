//! Preconditioners and level smoothers.
//!
//! `Preconditioner<M, V>` is the solver-facing interface (z = M⁻¹ r). `Smoother` is the
//! per-level relaxation interface the multigrid cycle drives: it improves an existing
//! guess for A·x = b and is set up once from the level operator.

use std::fmt;
use std::sync::Arc;

use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::parallel::Comm;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<M, V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &V, z: &mut V) -> Result<(), MgError>;
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), MgError> {
        Ok(())
    }
}

/// Relaxation on one level.
///
/// `apply` must be callable concurrently from several threads on distinct vectors once
/// `setup` has returned.
pub trait Smoother: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Bind to an operator and precompute whatever the sweeps need.
    fn setup(&mut self, a: Arc<CrsMatrix>) -> Result<(), MgError>;

    /// Improve `x` toward A·x = b. With `zero_guess` the incoming `x` is known to be zero.
    fn apply(&self, b: &DistVector, x: &mut DistVector, zero_guess: bool) -> Result<(), MgError>;
}

pub(crate) fn not_set_up(name: &str) -> MgError {
    MgError::NotReady(format!("{name}: setup has not been called"))
}

/// D⁻¹ of the owned rows. A zero diagonal anywhere is a `ZeroPivot` at the lowest such
/// global row, reported on every rank. Collective.
pub fn inverse_diagonal(a: &CrsMatrix) -> Result<Vec<f64>, MgError> {
    let start = a.row_map().min_global();
    let diag = a.local_diag_copy()?;
    let first_zero = diag.iter().position(|&d| d == 0.0).map_or(usize::MAX, |i| start + i);
    let first_zero = a.comm().all_reduce_min_usize(first_zero);
    if first_zero != usize::MAX {
        return Err(MgError::ZeroPivot(first_zero));
    }
    Ok(diag.into_iter().map(|d| 1.0 / d).collect())
}

pub mod chebyshev;
pub mod direct;
pub mod jacobi;
pub mod sor;

pub use chebyshev::Chebyshev;
pub use direct::DirectSolver;
pub use jacobi::Jacobi;
pub use sor::{MatSorType, Sor};
