//! Level smoothers and the coarse direct solve.

use std::sync::Arc;

use log::{debug, warn};

use crate::config::{MgOptions, SmootherType};
use crate::error::MgError;
use crate::matrix::CrsMatrix;
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};
use crate::preconditioner::{Chebyshev, DirectSolver, Jacobi, Smoother, Sor};

/// Coarse problems above this size still get a direct solve, with a warning.
const DIRECT_WARN_ROWS: usize = 5000;

/// Builds one relaxation object per level from `A`.
#[derive(Debug, Clone)]
pub struct SmootherFactory {
    pub kind: SmootherType,
    pub sweeps: usize,
    pub damping: f64,
    pub chebyshev_degree: usize,
    pub chebyshev_ratio: f64,
    pub eigen_iterations: usize,
}

impl Default for SmootherFactory {
    fn default() -> Self {
        SmootherFactory::from_options(&MgOptions::default())
    }
}

impl SmootherFactory {
    pub fn from_options(o: &MgOptions) -> Self {
        SmootherFactory {
            kind: o.smoother,
            sweeps: o.sweeps,
            damping: o.smoother_damping,
            chebyshev_degree: o.chebyshev_degree,
            chebyshev_ratio: o.chebyshev_ratio,
            eigen_iterations: o.eigen_iterations,
        }
    }

    /// An unconfigured smoother. `lambda_max` is a known estimate of λmax(D⁻¹A).
    pub fn make(&self, lambda_max: Option<f64>) -> Box<dyn Smoother> {
        match self.kind {
            SmootherType::Jacobi => Box::new(Jacobi::new(self.sweeps, self.damping)),
            SmootherType::GaussSeidel => Box::new(Sor::gauss_seidel(self.sweeps, self.damping)),
            SmootherType::SymmetricGaussSeidel => Box::new(Sor::symmetric_gauss_seidel(self.sweeps, self.damping)),
            SmootherType::Chebyshev => {
                let mut c = Chebyshev::new(self.chebyshev_degree, self.chebyshev_ratio);
                c.eigen_iterations = self.eigen_iterations;
                match lambda_max {
                    Some(l) => Box::new(c.with_estimated_lambda_max(l)),
                    None => Box::new(c),
                }
            }
        }
    }
}

/// Every relaxation method here divides by the diagonal. Checked collectively so that no
/// rank enters a collective setup step alone.
fn check_diagonal(a: &CrsMatrix, ctx: &BuildContext<'_>) -> Result<(), MgError> {
    let start = a.row_map().min_global();
    let local = a.local_diag_copy()?.iter().position(|d| *d == 0.0);
    let global = a.comm().all_reduce_sum_usize(usize::from(local.is_some()));
    match local {
        Some(i) => Err(MgError::ZeroPivot(start + i)),
        None if global > 0 => Err(ctx.fail("zero diagonal entry on another rank")),
        None => Ok(()),
    }
}

impl Factory for SmootherFactory {
    fn name(&self) -> &str {
        "SmootherFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(DataKey::A)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::Smoother)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Values
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let a = ctx.matrix(DataKey::A)?;
        check_diagonal(&a, ctx)?;
        // reuse the prolongator's estimate when it was computed on this level
        let lambda = ctx.get(DataKey::LambdaMax).ok().and_then(|v| match v {
            LevelValue::Scalar(l) => Some(*l),
            _ => None,
        });
        let mut s = self.make(lambda);
        s.setup(a)?;
        debug!("level {}: {} smoother ready", ctx.level(), s.name());
        ctx.set(DataKey::Smoother, Rel::Here, LevelValue::Smoother(Arc::from(s)))
    }
}

/// Replicated dense LU on the coarsest level.
#[derive(Debug, Clone, Default)]
pub struct DirectSolverFactory;

impl Factory for DirectSolverFactory {
    fn name(&self) -> &str {
        "DirectSolverFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        vec![Input::here(DataKey::A)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::Smoother)]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Values
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let a = ctx.matrix(DataKey::A)?;
        let n = a.global_num_rows();
        if n > DIRECT_WARN_ROWS {
            warn!("level {}: direct coarse solve on {n} rows is replicated on every rank", ctx.level());
        }
        let mut lu = DirectSolver::new();
        lu.setup(a)?;
        ctx.set(DataKey::Smoother, Rel::Here, LevelValue::Smoother(Arc::new(lu)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vector::DistVector;
    use crate::matrix::gallery;
    use crate::multigrid::factory::FactoryId;
    use crate::parallel::{Map, SerialComm, ThreadComm};

    fn level_with(a: CrsMatrix) -> Vec<Level> {
        let mut levels = vec![Level::new(0)];
        levels[0].set_user(DataKey::A, LevelValue::Operator(Arc::new(a))).unwrap();
        levels
    }

    #[test]
    fn builds_the_configured_kind() {
        for (kind, name) in [
            (SmootherType::Jacobi, "Jacobi"),
            (SmootherType::SymmetricGaussSeidel, "symmetric Gauss-Seidel"),
            (SmootherType::Chebyshev, "Chebyshev"),
        ] {
            let mut levels = level_with(gallery::laplace_1d(20, Arc::new(SerialComm)).unwrap());
            let f = SmootherFactory { kind, ..Default::default() };
            f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(0), &f)).unwrap();
            assert_eq!(levels[0].smoother().unwrap().name(), name);
        }
    }

    #[test]
    fn smoother_reduces_the_residual() {
        let a = gallery::laplace_1d(20, Arc::new(SerialComm)).unwrap();
        let mut levels = level_with(a);
        let f = SmootherFactory::default();
        f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(0), &f)).unwrap();
        let a = levels[0].matrix(DataKey::A).unwrap();
        let s = levels[0].smoother().unwrap();
        let b = DistVector::from_global_fn(Arc::clone(a.row_map()), |g| if g % 2 == 0 { 1.0 } else { -1.0 });
        let mut x = DistVector::zeros(Arc::clone(a.row_map()));
        s.apply(&b, &mut x, true).unwrap();
        let mut r = b.clone();
        a.residual(&x, &b, &mut r).unwrap();
        assert!(r.norm2() < b.norm2());
    }

    #[test]
    fn zero_diagonal_is_reported_on_every_rank() {
        let res = ThreadComm::run(2, |comm| {
            let map = Arc::new(Map::uniform(4, comm));
            let rows = (0..map.local_len())
                .map(|i| {
                    let g = map.min_global() + i;
                    if g == 3 { vec![(2, -1.0)] } else { vec![(g, 2.0)] }
                })
                .collect();
            let a = CrsMatrix::from_global_rows(map.clone(), rows, map.clone(), map).unwrap();
            let mut levels = level_with(a);
            let f = SmootherFactory::default();
            f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(0), &f)).unwrap_err()
        });
        assert_eq!(res[1], MgError::ZeroPivot(3));
        assert!(matches!(res[0], MgError::BuildFailed { .. }));
    }

    #[test]
    fn direct_solver_is_exact_on_the_coarse_level() {
        let mut levels = level_with(gallery::laplace_1d(9, Arc::new(SerialComm)).unwrap());
        let f = DirectSolverFactory;
        f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(0), &f)).unwrap();
        let a = levels[0].matrix(DataKey::A).unwrap();
        let b = DistVector::from_global_fn(Arc::clone(a.row_map()), |g| g as f64);
        let mut x = DistVector::zeros(Arc::clone(a.row_map()));
        levels[0].smoother().unwrap().apply(&b, &mut x, true).unwrap();
        let mut r = b.clone();
        a.residual(&x, &b, &mut r).unwrap();
        assert!(r.norm_inf() < 1e-12);
    }
}
