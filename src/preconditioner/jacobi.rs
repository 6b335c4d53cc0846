// Damped Jacobi relaxation: x ← x + ω D⁻¹ (b − A x)

use std::sync::Arc;

use crate::core::vector::DistVector;
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::parallel::par_for_each_row;
use crate::preconditioner::{Preconditioner, Smoother, inverse_diagonal, not_set_up};

#[derive(Debug, Clone)]
pub struct Jacobi {
    pub sweeps: usize,
    pub omega: f64,
    a: Option<Arc<CrsMatrix>>,
    pub(crate) inv_diag: Vec<f64>,
}

impl Jacobi {
    /// new with empty state; user must call `setup`.
    pub fn new(sweeps: usize, omega: f64) -> Self {
        Self { sweeps, omega, a: None, inv_diag: Vec::new() }
    }
}

impl Default for Jacobi {
    fn default() -> Self {
        Self::new(1, 1.0)
    }
}

impl Smoother for Jacobi {
    fn name(&self) -> &str {
        "Jacobi"
    }

    fn setup(&mut self, a: Arc<CrsMatrix>) -> Result<(), MgError> {
        self.inv_diag = inverse_diagonal(&a)?;
        self.a = Some(a);
        Ok(())
    }

    fn apply(&self, b: &DistVector, x: &mut DistVector, zero_guess: bool) -> Result<(), MgError> {
        let a = self.a.as_ref().ok_or_else(|| not_set_up(self.name()))?;
        let mut first = 0;
        if zero_guess && self.sweeps > 0 {
            let (bl, d) = (b.local(), &self.inv_diag);
            par_for_each_row(x.local_mut(), |i| self.omega * d[i] * bl[i]);
            first = 1;
        }
        let mut r = b.clone();
        for _ in first..self.sweeps {
            a.residual(x, b, &mut r)?;
            for ((xi, ri), di) in x.local_mut().iter_mut().zip(r.local()).zip(&self.inv_diag) {
                *xi += self.omega * di * ri;
            }
        }
        Ok(())
    }
}

impl Preconditioner<CrsMatrix, DistVector> for Jacobi {
    fn setup(&mut self, a: &CrsMatrix) -> Result<(), MgError> {
        Smoother::setup(self, Arc::new(a.clone()))
    }

    fn apply(&self, r: &DistVector, z: &mut DistVector) -> Result<(), MgError> {
        z.fill(0.0);
        Smoother::apply(self, r, z, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::gallery;
    use crate::parallel::SerialComm;
    use approx::assert_abs_diff_eq;

    #[test]
    fn one_zero_guess_sweep_is_scaled_diagonal_solve() {
        let a = Arc::new(gallery::laplace_1d(4, Arc::new(SerialComm)).unwrap());
        let mut j = Jacobi::new(1, 0.5);
        Smoother::setup(&mut j, a.clone()).unwrap();
        let b = DistVector::from_global_fn(a.row_map().clone(), |_| 1.0);
        let mut x = DistVector::zeros(a.row_map().clone());
        Smoother::apply(&j, &b, &mut x, true).unwrap();
        for v in x.local() {
            assert_abs_diff_eq!(*v, 0.25, epsilon = 1e-15);
        }
    }

    #[test]
    fn sweeps_reduce_the_residual() {
        let a = Arc::new(gallery::laplace_1d(20, Arc::new(SerialComm)).unwrap());
        let mut j = Jacobi::new(5, 2.0 / 3.0);
        Smoother::setup(&mut j, a.clone()).unwrap();
        let b = DistVector::from_global_fn(a.row_map().clone(), |g| (g % 3) as f64);
        let mut x = DistVector::zeros(a.row_map().clone());
        let mut r = b.clone();
        Smoother::apply(&j, &b, &mut x, true).unwrap();
        a.residual(&x, &b, &mut r).unwrap();
        assert!(r.norm2() < b.norm2());
    }

    #[test]
    fn apply_before_setup_fails() {
        let j = Jacobi::default();
        let map = Arc::new(crate::parallel::Map::uniform(2, Arc::new(SerialComm)));
        let b = DistVector::zeros(map.clone());
        let mut x = DistVector::zeros(map);
        assert!(matches!(Smoother::apply(&j, &b, &mut x, true), Err(MgError::NotReady(_))));
    }
}
