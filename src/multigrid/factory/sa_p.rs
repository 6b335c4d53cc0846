//! Smoothed-aggregation prolongator.
//!
//! P = (I − ω/λ·D⁻¹A)·Ptent, with λ an estimate of the largest eigenvalue of D⁻¹A.
//! Rows with a zero diagonal are left unsmoothed.

use std::sync::Arc;

use log::{debug, warn};

use crate::config::Algorithm;
use crate::error::MgError;
use crate::matrix::{add, multiply};
use crate::multigrid::factory::{BuildContext, Factory, Input, Output, Rel};
use crate::multigrid::level::{DataKey, Level, LevelValue, ReuseClass};
use crate::utils::eigen::estimate_lambda_max;

#[derive(Debug, Clone)]
pub struct SaPFactory {
    pub algorithm: Algorithm,
    pub damping: f64,
    pub eigen_iterations: usize,
}

impl Default for SaPFactory {
    fn default() -> Self {
        SaPFactory { algorithm: Algorithm::SmoothedAggregation, damping: 4.0 / 3.0, eigen_iterations: 10 }
    }
}

impl Factory for SaPFactory {
    fn name(&self) -> &str {
        "SaPFactory"
    }

    fn declare_inputs(&self, _level: &Level) -> Vec<Input> {
        match self.algorithm {
            Algorithm::SmoothedAggregation => vec![Input::here(DataKey::A), Input::here(DataKey::Ptent)],
            Algorithm::Unsmoothed => vec![Input::here(DataKey::Ptent)],
        }
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::here(DataKey::P), Output::here(DataKey::LambdaMax).optional()]
    }

    fn reuse_class(&self) -> ReuseClass {
        ReuseClass::Transfer
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), MgError> {
        let ptent = ctx.matrix(DataKey::Ptent)?;
        if self.algorithm == Algorithm::Unsmoothed || self.damping == 0.0 {
            return ctx.set(DataKey::P, Rel::Here, LevelValue::Transfer(ptent));
        }
        let a = ctx.matrix(DataKey::A)?;
        let diag = a.local_diag_copy()?;
        let zeros = diag.iter().filter(|d| **d == 0.0).count();
        let zeros = a.comm().all_reduce_sum_usize(zeros);
        if zeros > 0 {
            warn!("level {}: {zeros} zero diagonal entries left unsmoothed in P", ctx.level());
        }
        let inv_diag: Vec<f64> = diag.iter().map(|&d| if d == 0.0 { 0.0 } else { 1.0 / d }).collect();

        let lambda = match ctx.get(DataKey::LambdaMax) {
            Ok(LevelValue::Scalar(l)) => *l,
            _ => estimate_lambda_max(&a, &inv_diag, self.eigen_iterations)?,
        };
        if !(lambda.is_finite() && lambda > 0.0) {
            return Err(ctx.fail(format!("eigenvalue estimate {lambda} is not positive")));
        }
        let omega = self.damping / lambda;
        debug!("level {}: lambda_max(D^-1 A) = {lambda:.6}, prolongator damping {omega:.6}", ctx.level());

        let mut ap = multiply(&a, &ptent)?;
        let scale: Vec<f64> = inv_diag.iter().map(|d| -omega * d).collect();
        ap.left_scale(&scale)?;
        let p = add(1.0, &ptent, 1.0, &ap)?.with_label(format!("P{}", ctx.level()));
        ctx.set(DataKey::P, Rel::Here, LevelValue::Transfer(Arc::new(p)))?;
        ctx.set(DataKey::LambdaMax, Rel::Here, LevelValue::Scalar(lambda))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::Operator;
    use crate::core::vector::{DistVector, MultiVector};
    use crate::matrix::{CrsMatrix, gallery};
    use crate::multigrid::factory::{AggregationFactory, AmalgamatedGraph, FactoryId, TentativePFactory};
    use crate::parallel::SerialComm;

    fn with_ptent(n: usize) -> Vec<Level> {
        let a = Arc::new(gallery::laplace_1d(n, Arc::new(SerialComm)).unwrap());
        let g = AmalgamatedGraph::build(&a, 1, 0.0).unwrap();
        let aggs = AggregationFactory::default().aggregate(&g);
        let ns = MultiVector::from_global_fn(Arc::clone(a.row_map()), 1, |_, _| 1.0);
        let mut levels = vec![Level::new(0)];
        levels[0].set_user(DataKey::A, LevelValue::Operator(a)).unwrap();
        levels[0].set_user(DataKey::Aggregates, LevelValue::Aggregates(Arc::new(aggs))).unwrap();
        levels[0].set_user(DataKey::Nullspace, LevelValue::VectorSet(Arc::new(ns))).unwrap();
        let f = TentativePFactory;
        f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(0), &f)).unwrap();
        levels
    }

    fn entries(p: &CrsMatrix) -> usize {
        p.local_num_entries()
    }

    #[test]
    fn smoothing_widens_the_stencil() {
        let mut levels = with_ptent(30);
        let f = SaPFactory::default();
        f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(1), &f)).unwrap();
        let lambda = levels[0].scalar(DataKey::LambdaMax).unwrap();
        assert!(lambda > 1.0 && lambda <= 2.0 + 1e-12);
        let p = levels[0].matrix(DataKey::P).unwrap();
        let ptent = levels[0].matrix(DataKey::Ptent).unwrap();
        assert!(entries(p) > entries(ptent));
        assert_eq!(p.label_str(), "P0");
    }

    #[test]
    fn smoothing_damps_the_energy_of_coarse_basis_functions() {
        let mut levels = with_ptent(30);
        let f = SaPFactory::default();
        f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(1), &f)).unwrap();
        let a = levels[0].matrix(DataKey::A).unwrap();
        let energy = |m: &CrsMatrix| {
            let map = Arc::clone(m.domain_map().unwrap());
            let e = DistVector::from_global_fn(map, |g| if g == 4 { 1.0 } else { 0.0 });
            let mut v = DistVector::zeros(Arc::clone(m.row_map()));
            m.matvec(&e, &mut v).unwrap();
            let mut av = v.clone();
            a.matvec(&v, &mut av).unwrap();
            v.dot(&av)
        };
        let p = levels[0].matrix(DataKey::P).unwrap();
        let ptent = levels[0].matrix(DataKey::Ptent).unwrap();
        assert!(energy(p.as_ref()) < energy(ptent.as_ref()));
    }

    #[test]
    fn unsmoothed_shares_the_tentative_prolongator() {
        let mut levels = with_ptent(12);
        let f = SaPFactory { algorithm: Algorithm::Unsmoothed, ..Default::default() };
        f.build(&mut BuildContext::new(&mut levels, 0, FactoryId(1), &f)).unwrap();
        assert!(levels[0].get(DataKey::P).unwrap().ptr_eq(levels[0].get(DataKey::Ptent).unwrap()));
        assert!(!levels[0].is_available(DataKey::LambdaMax));
    }
}
