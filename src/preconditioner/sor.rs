//! Gauss-Seidel / SOR relaxation.
//!
//! Sweeps are processor-local (hybrid Gauss-Seidel): ghost entries of `x` are imported
//! once before each directional pass and held fixed while the owned rows are updated in
//! place. With a single rank this is exact Gauss-Seidel.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::preconditioner::{Preconditioner, Smoother, inverse_diagonal, not_set_up};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MatSorType: u32 {
        const FORWARD_SWEEP   = 0b0001;
        const BACKWARD_SWEEP  = 0b0010;
        const SYMMETRIC_SWEEP = Self::FORWARD_SWEEP.bits() | Self::BACKWARD_SWEEP.bits();
        // skip the ghost import on the first pass when the guess is zero
        const ZERO_INITIAL_GUESS = 0b0100;
    }
}

#[derive(Debug, Clone)]
pub struct Sor {
    pub its: usize,
    pub sym: MatSorType,
    pub omega: f64,
    a: Option<Arc<CrsMatrix>>,
    inv_diag: Vec<f64>,
}

impl Sor {
    pub fn new(omega: f64, its: usize, sym: MatSorType) -> Self {
        Self { its, sym, omega, a: None, inv_diag: Vec::new() }
    }

    pub fn gauss_seidel(its: usize, omega: f64) -> Self {
        Self::new(omega, its, MatSorType::FORWARD_SWEEP)
    }

    pub fn symmetric_gauss_seidel(its: usize, omega: f64) -> Self {
        Self::new(omega, its, MatSorType::SYMMETRIC_SWEEP)
    }

    /// One pass over the owned rows in the given order.
    fn pass(
        &self,
        a: &CrsMatrix,
        b: &[f64],
        x: &mut DistVector,
        rows: impl Iterator<Item = usize>,
        ghosts_known_zero: bool,
    ) -> Result<(), MgError> {
        let n = x.local_len();
        let mut col = if ghosts_known_zero {
            vec![0.0; a.col_map()?.len()]
        } else {
            a.import_columns(x)?
        };
        let block = a.local_block()?;
        for i in rows {
            let sigma: f64 = block
                .symbolic()
                .col_idx_of_row_raw(i)
                .iter()
                .zip(block.val_of_row(i))
                .filter(|&(&c, _)| c != i)
                .map(|(&c, &v)| v * col[c])
                .sum();
            let gs = (b[i] - sigma) * self.inv_diag[i];
            col[i] = (1.0 - self.omega) * col[i] + self.omega * gs;
        }
        x.local_mut().copy_from_slice(&col[..n]);
        Ok(())
    }
}

impl fmt::Display for Sor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOR(omega={}, its={}, sym={:?})", self.omega, self.its, self.sym)
    }
}

impl Smoother for Sor {
    fn name(&self) -> &str {
        if self.sym.contains(MatSorType::SYMMETRIC_SWEEP) {
            "symmetric Gauss-Seidel"
        } else {
            "Gauss-Seidel"
        }
    }

    fn setup(&mut self, a: Arc<CrsMatrix>) -> Result<(), MgError> {
        self.inv_diag = inverse_diagonal(&a)?;
        self.a = Some(a);
        Ok(())
    }

    fn apply(&self, b: &DistVector, x: &mut DistVector, zero_guess: bool) -> Result<(), MgError> {
        let a = self.a.as_ref().ok_or_else(|| not_set_up(self.name()))?;
        let n = x.local_len();
        let mut zero = zero_guess || self.sym.contains(MatSorType::ZERO_INITIAL_GUESS);
        for _ in 0..self.its {
            if self.sym.contains(MatSorType::FORWARD_SWEEP) {
                self.pass(a, b.local(), x, 0..n, zero)?;
                zero = false;
            }
            if self.sym.contains(MatSorType::BACKWARD_SWEEP) {
                self.pass(a, b.local(), x, (0..n).rev(), zero)?;
                zero = false;
            }
        }
        Ok(())
    }
}

impl Preconditioner<CrsMatrix, DistVector> for Sor {
    fn setup(&mut self, a: &CrsMatrix) -> Result<(), MgError> {
        Smoother::setup(self, Arc::new(a.clone()))
    }

    fn apply(&self, r: &DistVector, z: &mut DistVector) -> Result<(), MgError> {
        z.fill(0.0);
        Smoother::apply(self, r, z, true)
    }
}
